//! Command-line argument parsing for rtpstorage

/// Parsed command line arguments
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub validate: bool,
    pub help: bool,
    /// Overrides RTP_PORT
    pub port: Option<u16>,
}

pub fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

/// Parse an argument vector whose first element is the program name
pub fn parse_args_from(args: &[String]) -> Args {
    let mut result = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--validate" => result.validate = true,
            "--help" | "-h" => result.help = true,
            "--port" => {
                if i + 1 < args.len() {
                    i += 1;
                    result.port = args[i].parse().ok();
                }
            }
            _ => {}
        }
        i += 1;
    }

    result
}

pub fn print_help() {
    println!("rtpstorage - RTP packet storage for FEC recovery\n");
    println!("USAGE:");
    println!("    rtpstorage [OPTIONS]\n");
    println!("OPTIONS:");
    println!("    --port N                Receive RTP on UDP port N (overrides RTP_PORT)");
    println!("    --validate              Validate configuration and exit");
    println!("    --help, -h              Show this help message\n");
    println!("ENVIRONMENT:");
    println!("    RTP_PORT, STORAGE_SIZE_TIME_MS, FEC_PAYLOAD_TYPE,");
    println!("    MAX_PENDING_LOSSES, STATS_INTERVAL_SECS (a .env file is read if present)");
}
