use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ferric_pdf::filters::{self, FilterType};
use ferric_pdf::writer::serialize;
use ferric_pdf::{Document, Object, ObjectId, ParseOptions, XRefEntry};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "ferricpdf",
    about = "Inspect and update the structure of PDF files",
    version,
    author
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Password for encrypted files
    #[arg(long, global = true, default_value = "")]
    password: String,

    /// Reject malformed input instead of repairing it
    #[arg(long, global = true)]
    strict: bool,

    /// Rebuild the cross-reference index when it cannot be read
    #[arg(long, global = true, conflicts_with = "strict")]
    recover: bool,

    /// Upper bound on object numbers and xref sizes
    #[arg(long, global = true)]
    max_objects: Option<u32>,

    /// Log parser decisions to stderr (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize the file structure
    Info {
        /// Input PDF file
        input: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List the merged cross-reference entries
    Xref {
        /// Input PDF file
        input: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print one indirect object
    Object {
        /// Input PDF file
        input: PathBuf,

        /// Object number
        number: u32,

        /// Generation number
        #[arg(default_value_t = 0)]
        generation: u16,

        /// Write the decoded stream payload instead of the object
        #[arg(short, long)]
        decode: bool,

        /// Output file for --decode (defaults to stdout)
        #[arg(short, long, requires = "decode")]
        output: Option<PathBuf>,
    },

    /// Run one stream filter over a file
    Decode {
        /// Filter name, e.g. FlateDecode or AHx
        #[arg(short, long)]
        filter: String,

        /// Encode instead of decode
        #[arg(short, long)]
        encode: bool,

        /// Input file
        input: PathBuf,

        /// Output file
        output: PathBuf,
    },

    /// Append an incremental update that rewrites the catalog
    Touch {
        /// Input PDF file
        input: PathBuf,

        /// Write the updated file here instead of appending in place
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);
    let global = &cli.global;

    match cli.command {
        Commands::Info { input, json } => info(&input, global, json),
        Commands::Xref { input, json } => xref(&input, global, json),
        Commands::Object {
            input,
            number,
            generation,
            decode,
            output,
        } => object(
            &input,
            global,
            ObjectId::new(number, generation),
            decode,
            output.as_deref(),
        ),
        Commands::Decode {
            filter,
            encode,
            input,
            output,
        } => run_filter(&filter, encode, &input, &output),
        Commands::Touch { input, output } => touch(&input, global, output.as_deref()),
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_options(global: &GlobalArgs) -> ParseOptions {
    let mut options = if global.strict {
        ParseOptions::strict()
    } else {
        ParseOptions::default().with_recovery(global.recover)
    };
    if let Some(max) = global.max_objects {
        options = options.with_max_object_count(max);
    }
    options
}

fn open(path: &Path, global: &GlobalArgs) -> Result<Document> {
    let options = parse_options(global);
    debug!(
        "Opening {} (strict: {}, recover: {})",
        path.display(),
        options.strict,
        options.recover_xref
    );
    Document::open_with_options(path, options, &global.password)
        .with_context(|| format!("Failed to open {}", path.display()))
}

fn entry_type(entry: &XRefEntry) -> &'static str {
    match entry {
        XRefEntry::Free { .. } => "f",
        XRefEntry::InUse { .. } => "n",
        XRefEntry::Compressed { .. } => "c",
    }
}

fn info(path: &Path, global: &GlobalArgs, json: bool) -> Result<()> {
    let doc = open(path, global)?;
    let Some(reader) = doc.reader() else {
        bail!("{} has no source", path.display());
    };
    let xref = reader.xref();
    let mut trailer_keys: Vec<&String> = doc.trailer().dict().keys().collect();
    trailer_keys.sort();
    let live_objects = xref.iter().filter(|(_, entry)| !entry.is_free()).count();

    if json {
        let summary = serde_json::json!({
            "file": path.display().to_string(),
            "version": doc.version(),
            "file_size": reader.file_len(),
            "startxref": xref.startxref(),
            "sections": xref.sections(),
            "recovered": xref.is_recovered(),
            "trailer_keys": trailer_keys,
            "xref_entries": xref.len(),
            "objects": live_objects,
            "encrypted": doc.is_encrypted(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("File:        {}", path.display());
    println!("Version:     {}", doc.version());
    println!("Size:        {} bytes", reader.file_len());
    println!("startxref:   {}", xref.startxref());
    println!("Sections:");
    for section in xref.sections() {
        println!("  {:>10}  {:?}", section.offset, section.kind);
    }
    if xref.is_recovered() {
        println!("  (rebuilt from object headers)");
    }
    let keys: Vec<&str> = trailer_keys.iter().map(|key| key.as_str()).collect();
    println!("Trailer:     {}", keys.join(" "));
    println!("Objects:     {live_objects} ({} xref entries)", xref.len());
    println!(
        "Encrypted:   {}",
        if doc.is_encrypted() { "yes" } else { "no" }
    );
    Ok(())
}

fn xref(path: &Path, global: &GlobalArgs, json: bool) -> Result<()> {
    let doc = open(path, global)?;
    let Some(xref) = doc.xref() else {
        bail!("{} has no cross-reference index", path.display());
    };

    if json {
        let entries: Vec<serde_json::Value> = xref
            .iter()
            .map(|(number, entry)| -> Result<serde_json::Value> {
                let mut value = serde_json::to_value(entry)?;
                if let Some(map) = value.as_object_mut() {
                    map.insert("number".to_string(), number.into());
                }
                Ok(value)
            })
            .collect::<Result<_>>()?;
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (number, entry) in xref.iter() {
        let (_, field2, field3) = entry.fields();
        writeln!(out, "{number:>8}  {}  {field2:>10}  {field3:>5}", entry_type(entry))?;
    }
    Ok(())
}

fn object(
    path: &Path,
    global: &GlobalArgs,
    id: ObjectId,
    decode: bool,
    output: Option<&Path>,
) -> Result<()> {
    let mut doc = open(path, global)?;

    if decode {
        let data = doc
            .decode_stream(id)
            .with_context(|| format!("Failed to decode object {id}"))?;
        match output {
            Some(output) => {
                std::fs::write(output, &data)
                    .with_context(|| format!("Failed to write {}", output.display()))?;
                eprintln!("Wrote {} bytes to {}", data.len(), output.display());
            }
            None => std::io::stdout().write_all(&data)?,
        }
        return Ok(());
    }

    let object = doc
        .get_object(id)
        .with_context(|| format!("Failed to load object {id}"))?;
    let text = match object {
        Object::Stream(stream) => {
            let dict = serialize(&Object::Dictionary(stream.dict().clone()));
            format!(
                "{}\nstream ({} bytes)",
                String::from_utf8_lossy(&dict),
                stream.data().len()
            )
        }
        other => String::from_utf8_lossy(&serialize(other)).into_owned(),
    };
    println!("{} {} obj\n{text}\nendobj", id.number(), id.generation());
    Ok(())
}

fn run_filter(name: &str, encode: bool, input: &Path, output: &Path) -> Result<()> {
    let Some(filter) = FilterType::from_name(name) else {
        bail!("Unknown filter '{name}'");
    };
    let data =
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let result = if encode {
        filters::encode(filter, None, &data)?
    } else {
        filters::decode(filter, None, &data)?
    };
    let mut file =
        File::create(output).with_context(|| format!("Failed to create {}", output.display()))?;
    file.write_all(&result)?;
    println!(
        "✓ {} {} bytes into {} bytes",
        if encode { "Encoded" } else { "Decoded" },
        data.len(),
        result.len()
    );
    Ok(())
}

fn touch(path: &Path, global: &GlobalArgs, output: Option<&Path>) -> Result<()> {
    let mut doc = open(path, global)?;
    let root = doc.trailer().root()?;
    doc.get_object_mut(root)
        .with_context(|| format!("Failed to load catalog {root}"))?;

    let target = output.unwrap_or(path);
    let summary = doc
        .save_update(target)
        .with_context(|| format!("Failed to update {}", target.display()))?;
    println!(
        "✓ Appended update to {}: {} entries, xref at {}",
        target.display(),
        summary.entries.len(),
        summary.startxref
    );
    Ok(())
}
