use crate::config::ParseOptions;
use crate::error::Result;
use crate::objects::{Dictionary, Object};
use crate::parser::filters::{self, FilterType};
use std::sync::Arc;

/// A stream object: its dictionary plus the payload as stored in the file.
///
/// The payload is shared, so cloning the object does not copy it.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    dict: Dictionary,
    data: Arc<[u8]>,
}

impl Stream {
    /// Wraps an existing dictionary and payload. `/Length` is left as found.
    pub fn new(dict: Dictionary, data: Vec<u8>) -> Self {
        Self {
            dict,
            data: Arc::from(data),
        }
    }

    /// Builds an unfiltered stream, setting `/Length` from the payload.
    pub fn with_data(data: Vec<u8>) -> Self {
        let mut dict = Dictionary::new();
        dict.set("Length", data.len() as i64);
        Self::new(dict, data)
    }

    pub fn dict(&self) -> &Dictionary {
        &self.dict
    }

    pub fn dict_mut(&mut self) -> &mut Dictionary {
        &mut self.dict
    }

    /// Raw (still encoded) payload.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn shared_data(&self) -> Arc<[u8]> {
        Arc::clone(&self.data)
    }

    /// Replaces the raw payload and updates `/Length`.
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.dict.set("Length", data.len() as i64);
        self.data = Arc::from(data);
    }

    /// Runs the `/Filter` chain over the payload.
    pub fn decode(&self, options: &ParseOptions) -> Result<Vec<u8>> {
        filters::decode_stream(&self.dict, &self.data, options)
    }

    /// Encodes `data` with `filter` and stores it, recording the filter in the dictionary.
    pub fn set_encoded_data(
        &mut self,
        filter: FilterType,
        params: Option<Dictionary>,
        data: &[u8],
    ) -> Result<()> {
        let encoded = filters::encode(filter, params.as_ref(), data)?;
        self.dict.set("Filter", Object::name(filter.name()));
        match params {
            Some(params) => self.dict.set("DecodeParms", params),
            None => {
                self.dict.remove("DecodeParms");
            }
        }
        self.set_data(encoded);
        Ok(())
    }

    pub fn is_filtered(&self) -> bool {
        self.dict.contains_key("Filter")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_data_sets_length() {
        let stream = Stream::with_data(b"hello".to_vec());
        assert_eq!(stream.dict().get_integer("Length"), Some(5));
        assert_eq!(stream.data(), b"hello");
        assert!(!stream.is_filtered());
    }

    #[test]
    fn test_clone_shares_payload() {
        let stream = Stream::with_data(vec![7; 1024]);
        let copy = stream.clone();
        assert!(Arc::ptr_eq(&stream.shared_data(), &copy.shared_data()));
    }

    #[test]
    fn test_encoded_payload_decodes_back() {
        let mut stream = Stream::with_data(Vec::new());
        stream
            .set_encoded_data(FilterType::AsciiHex, None, b"PDF")
            .unwrap();
        assert_eq!(stream.dict().get_name("Filter"), Some("ASCIIHexDecode"));
        assert_eq!(
            stream.dict().get_integer("Length"),
            Some(stream.data().len() as i64)
        );
        assert_eq!(stream.decode(&ParseOptions::default()).unwrap(), b"PDF");
    }
}
