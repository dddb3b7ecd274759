use clap::Parser;
use compass_context::text::{TextChunk, TextChunker};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::process;

/// Chunk a text file into overlapping windows and print them as JSON.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the input text file. If not provided, reads from stdin.
    #[arg(short, long)]
    input: Option<String>,

    /// Source label attached to every chunk.
    #[arg(short, long, default_value = "stdin")]
    source: String,

    /// Window size in characters.
    #[arg(short = 'c', long, default_value_t = 512)]
    chunk_size: usize,

    /// Characters shared by consecutive windows.
    #[arg(short, long, default_value_t = 50)]
    overlap: usize,
}

#[derive(Serialize)]
struct SourcedChunk<'a> {
    source: &'a str,
    #[serde(flatten)]
    chunk: &'a TextChunk,
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    let chunker = match TextChunker::new(args.chunk_size, args.overlap) {
        Ok(chunker) => chunker,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(2);
        }
    };

    let file_content = if let Some(input_path) = args.input {
        String::from_utf8_lossy(&fs::read(input_path)?).into_owned()
    } else {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer)?;
        String::from_utf8_lossy(&buffer).into_owned()
    };

    let chunks: Vec<TextChunk> = chunker.chunks(&file_content).collect();
    let output: Vec<SourcedChunk> = chunks
        .iter()
        .map(|chunk| SourcedChunk {
            source: &args.source,
            chunk,
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
