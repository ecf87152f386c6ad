// SPDX-License-Identifier: Apache-2.0

//! Copies one URL to another with an optional rate limit, printing progress
//! once per second.
//!
//! ```text
//! cargo run --example copy -- <input> <output> [bytes per second]
//! ```
//!
//! Inputs may be file paths, `data://` URLs, or `tcp://host:port` sockets.
//! Set `RUST_LOG=ferry=debug` to see stream and transfer events.

use std::env;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use ferry::{Action, Scheduler, Status, Transfer, TransferOptions};

#[tokio::main]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.init();

	let args: Vec<String> = env::args().skip(1).collect();
	let (input, output, rate) = match &args[..] {
		[input, output] => (input, output, 0),
		[input, output, rate] => match rate.parse() {
			Ok(rate) => (input, output, rate),
			Err(err) => {
				eprintln!("invalid rate {rate:?}: {err}");
				return ExitCode::FAILURE
			}
		},
		_ => {
			eprintln!("usage: copy <input> <output> [bytes per second]");
			return ExitCode::FAILURE
		}
	};

	match copy(input, output, rate).await {
		Ok(Status::Closed) => ExitCode::SUCCESS,
		Ok(status) => {
			eprintln!("copy ended: {status}");
			ExitCode::FAILURE
		}
		Err(err) => {
			eprintln!("copy failed: {err}");
			ExitCode::FAILURE
		}
	}
}

async fn copy(input: &str, output: &str, rate: usize) -> ferry::streams::Result<Status> {
	let mut transfer = Transfer::with_options(
		Scheduler::current()?,
		TransferOptions::new().with_rate(rate).with_autoclose(true)
	);
	transfer.set_istream_url(input)?;
	transfer.set_ostream_url(output)?;

	let handle = transfer.handle();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			handle.kill();
		}
	});

	transfer.open_done(0, |progress| {
		match progress.percent() {
			Some(percent) => println!(
				"{}: {} bytes ({percent}%), {} B/s",
				progress.status,
				progress.saved,
				progress.rate
			),
			None => println!("{}: {} bytes, {} B/s", progress.status, progress.saved, progress.rate),
		}
		Action::Continue
	}).await
}
