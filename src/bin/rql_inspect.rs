use std::{error::Error, fs::File, path::PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use log::info;

use rqlwire::{
    QueryOptions, Term, Value, encode,
    protocol::{
        Durability, FrameRead, FrameWrite, ProtocolTransport, Query, QueryKind, Response,
        TokenAllocator, TransportError,
    },
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every frame stored in a file
    Decode {
        /// File of concatenated frames
        path: PathBuf,
        /// Frames are queries rather than responses
        #[arg(long)]
        queries: bool,
    },
    /// Write a batch insert query frame
    Query {
        /// Output file
        out: PathBuf,
        #[arg(long, default_value = "benchmarks")]
        db: String,
        #[arg(long, default_value = "benchmarks")]
        table: String,
        /// Number of generated documents
        #[arg(long, default_value_t = 200)]
        rows: u32,
        #[arg(long)]
        min_batch_rows: Option<u32>,
        #[arg(long)]
        max_batch_rows: Option<u32>,
        #[arg(long, value_enum)]
        durability: Option<DurabilityArg>,
        /// Token carried by the frame
        #[arg(long, default_value_t = 1)]
        token: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DurabilityArg {
    Hard,
    Soft,
}

impl From<DurabilityArg> for Durability {
    fn from(value: DurabilityArg) -> Self {
        match value {
            DurabilityArg::Hard => Durability::Hard,
            DurabilityArg::Soft => Durability::Soft,
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Decode { path, queries } => decode(path, queries),
        Commands::Query {
            out,
            db,
            table,
            rows,
            min_batch_rows,
            max_batch_rows,
            durability,
            token,
        } => {
            let mut options = QueryOptions::new().db(db.as_str());
            if let Some(rows) = min_batch_rows {
                options = options.min_batch_rows(rows);
            }
            if let Some(rows) = max_batch_rows {
                options = options.max_batch_rows(rows);
            }
            if let Some(durability) = durability {
                options = options.durability(durability.into());
            }

            let docs = Value::Array(
                (0..rows)
                    .map(|i| Value::map([("customer_id", i.to_string())]))
                    .collect(),
            );
            let term = Term::db(db).table(table).insert(encode(&docs)?);
            let query = Query::build(
                &TokenAllocator::starting_at(token),
                term,
                &options,
                QueryKind::Start,
            )?;

            let frame = query.serialize()?;
            ProtocolTransport::new(File::create(&out)?).write_frame(&frame)?;
            info!("wrote {} byte query frame to {}", frame.len(), out.display());
            Ok(())
        }
    }
}

fn decode(path: PathBuf, queries: bool) -> Result<(), Box<dyn Error>> {
    let mut transport = ProtocolTransport::new(File::open(path)?);

    loop {
        let frame = match transport.read_frame() {
            Ok(frame) => frame,
            Err(TransportError::Closed) => break,
            Err(e) => return Err(e.into()),
        };

        if queries {
            let query = Query::decode(&frame)?;
            println!("token {} {:?}", query.token, query.kind);
            for (key, value) in &query.options {
                println!("  option {key} = {value:?}");
            }
            if let Some(term) = &query.term {
                println!("  term {term:?}");
            }
            continue;
        }

        let response = Response::decode(&frame)?;
        println!("token {} {:?}", response.token, response.kind);
        if !response.notes.is_empty() {
            println!("  notes {:?}", response.notes);
        }
        if let Some(error) = response.server_error() {
            println!("  {error}");
            for step in &error.backtrace {
                println!("    at {step:?}");
            }
            continue;
        }
        for payload in &response.results {
            match payload.datum() {
                Ok(datum) => println!("  {datum:?}"),
                Err(_) => println!("  <{} opaque bytes>", payload.as_bytes().len()),
            }
        }
    }

    Ok(())
}
