use devtools_trace::TraceFile;
use std::env;
use std::fs::File;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <events.json>", args[0]);
        return ExitCode::from(2);
    }

    let path = &args[1];

    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening '{}': {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    match TraceFile::parse(file) {
        Ok(trace) => {
            println!("Valid trace file: {}", path);
            println!("  Events: {}", trace.events.len());
            println!("  Profile chunks: {}", trace.chunks().count());
            println!("  Nodes: {}", trace.nodes().len());
            println!("  Samples: {}", trace.samples().count());
            println!("  Duration: {}", trace.time_deltas().sum::<i64>());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid trace file '{}': {}", path, e);
            ExitCode::FAILURE
        }
    }
}
