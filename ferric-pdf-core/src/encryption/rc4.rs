//! RC4 stream cipher used by security handlers up to revision 4

/// RC4 key for encryption/decryption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rc4Key {
    pub key: Vec<u8>,
}

impl Rc4Key {
    pub fn new(key: Vec<u8>) -> Self {
        Self { key }
    }

    pub fn from_slice(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }
}

/// RC4 cipher state
pub struct Rc4 {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Rc4 {
    /// Create a new RC4 cipher with the given key
    pub fn new(key: &Rc4Key) -> Self {
        let mut s = [0u8; 256];
        for (i, byte) in s.iter_mut().enumerate() {
            *byte = i as u8;
        }

        // Key scheduling algorithm (KSA)
        if !key.key.is_empty() {
            let mut j = 0u8;
            for i in 0..256 {
                j = j
                    .wrapping_add(s[i])
                    .wrapping_add(key.key[i % key.key.len()]);
                s.swap(i, usize::from(j));
            }
        }

        Self { s, i: 0, j: 0 }
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[usize::from(self.i)]);
        self.s.swap(usize::from(self.i), usize::from(self.j));
        let k = self.s[usize::from(self.i)].wrapping_add(self.s[usize::from(self.j)]);
        self.s[usize::from(k)]
    }

    /// Process data (encrypt or decrypt, RC4 is symmetric)
    pub fn process(&mut self, data: &[u8]) -> Vec<u8> {
        let mut output = data.to_vec();
        self.process_in_place(&mut output);
        output
    }

    pub fn process_in_place(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte ^= self.next_byte();
        }
    }
}

/// One-shot RC4 over `data`.
pub fn rc4_crypt(key: &[u8], data: &[u8]) -> Vec<u8> {
    Rc4::new(&Rc4Key::from_slice(key)).process(data)
}
