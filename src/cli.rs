use std::io::{self, BufRead, Write};
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_CONFIG_FILE;
use crate::prober::TestMode;

#[derive(Parser, Debug)]
#[command(version, about = "Aggregate, probe and deduplicate proxy subscription nodes", long_about = None)]
pub struct Args {
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, help = "Config file, accept file path or URL")]
    pub config: String,

    #[arg(
        short,
        long,
        value_parser = ["0", "1", "2", "3"],
        help = "Test mode: 0 no test, 1 TCP, 2 download speed, 3 both (skips the prompt)"
    )]
    pub mode: Option<String>,

    #[arg(short, long, help = "Emit debug log")]
    pub verbose: bool,
}

impl Args {
    /// Test mode given on the command line, if any
    pub fn test_mode(&self) -> Option<TestMode> {
        self.mode.as_deref().and_then(TestMode::from_choice)
    }
}

/// Interprets one answer line; anything unrecognized means "no test"
pub fn parse_choice(answer: &str) -> TestMode {
    TestMode::from_choice(answer).unwrap_or_else(|| {
        if !answer.trim().is_empty() {
            warn!("Unrecognized test choice {:?}, running without tests", answer.trim());
        }
        TestMode::None
    })
}

/// Asks for the test mode on stdin, defaulting to "no test" after `timeout`
pub async fn prompt_test_mode(timeout: Duration) -> TestMode {
    print!(
        "Select test: (0) No test, (1) TCP test, (2) Download speed test, (3) Both [default 0 in {}s]: ",
        timeout.as_secs()
    );
    let _ = io::stdout().flush();

    let answer = read_line_with_timeout(
        || {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).map(|_| line)
        },
        timeout,
    )
    .await;

    match answer {
        Some(line) => {
            let mode = parse_choice(&line);
            info!("Selected {}", mode);
            mode
        }
        None => {
            println!("\nDefaulting to (0) No test");
            info!("No test selected within {:?}, defaulting to no test", timeout);
            TestMode::None
        }
    }
}

/// Races a blocking line read against a timer
///
/// Returns `None` on timeout, discarding the read's eventual result. The read
/// runs on a plain thread because the runtime waits for blocking-pool tasks
/// at shutdown.
pub async fn read_line_with_timeout<F>(read: F, timeout: Duration) -> Option<String>
where
    F: FnOnce() -> io::Result<String> + Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let line = read().unwrap_or_else(|e| {
            debug!("Failed to read answer: {}", e);
            String::new()
        });
        let _ = tx.send(line);
    });

    tokio::select! {
        answer = rx => answer.ok(),
        _ = tokio::time::sleep(timeout) => None,
    }
}
