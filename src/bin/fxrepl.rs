// パス: src/bin/fxrepl.rs
// 役割: Binary entrypoint parsing the command line and launching the REPL or a hosted evaluation
// 意図: Offer a CLI executable for interactive formula exploration and scripted runs
// 関連ファイル: src/repl/cmd.rs, src/host.rs, src/logging.rs
use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use fxrepl::host::respond_json;
use fxrepl::repl::{run_repl, ReplOptions};

#[derive(Parser, Debug)]
#[command(version, about = "Interactive REPL for a small Excel-like formula language.")]
struct Args {
    /// Scripts imported (with echo) before the interactive loop.
    scripts: Vec<String>,

    /// Exit after running the scripts instead of reading stdin.
    #[arg(long)]
    batch: bool,

    /// Render multi-column tables as `[{..}, ..]` instead of aligned columns.
    #[arg(long)]
    no_format_tables: bool,

    /// Do not color error output.
    #[arg(long)]
    no_color: bool,

    /// Answer one JSON evaluation request read from PATH (`-` for stdin) and exit.
    #[arg(long, value_name = "PATH")]
    eval_request: Option<String>,

    /// Evaluation timeout for `--eval-request`, in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    timeout_ms: u64,
}

fn read_request(path: &str) -> io::Result<String> {
    if path == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        Ok(text)
    } else {
        std::fs::read_to_string(path)
    }
}

fn hosted(path: &str, timeout: Duration) -> ExitCode {
    let text = match read_request(path) {
        Ok(text) => text,
        Err(e) => {
            eprintln!("cannot read request {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };
    match respond_json(&text, timeout) {
        Ok(json) => {
            let mut stdout = io::stdout();
            if writeln!(stdout, "{}", json).is_err() {
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn main() -> ExitCode {
    fxrepl::logging::init();
    let args = Args::parse();

    if let Some(path) = &args.eval_request {
        return hosted(path, Duration::from_millis(args.timeout_ms));
    }

    let options = ReplOptions {
        format_tables: !args.no_format_tables,
        color: !args.no_color,
        scripts: args.scripts,
        batch: args.batch,
    };
    match run_repl(&options) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("REPL error: {}", e);
            ExitCode::FAILURE
        }
    }
}
