//! Storage gateway process entrypoint: loads configuration, opens the
//! session/index stores, wires drivers per `storage_config`, and serves
//! the HTTP edge while background workers run the expiry reaper and
//! index jobs.

#[macro_use]
extern crate tracing;

mod server;
mod wiring;

use std::path::PathBuf;

use structopt::StructOpt;

use gateway_util::error::Error;

#[derive(StructOpt, Debug)]
#[structopt(name = "gateway", about = "Multi-backend storage gateway")]
struct Opt {
	/// Path to the TOML configuration file.
	#[structopt(short = "c", long = "config", env = "GATEWAY_CONFIG_FILE", default_value = "/etc/gateway.toml")]
	config_file: PathBuf,
}

#[tokio::main]
async fn main() {
	let opt = Opt::from_args();

	if std::env::var("RUST_LOG").is_err() {
		std::env::set_var("RUST_LOG", "gateway=info,gateway_api=info,gateway_jobs=info,gateway_coordinator=info");
	}
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
		.init();

	if let Err(e) = run(opt).await {
		eprintln!("Error: {}", e);
		std::process::exit(1);
	}
}

async fn run(opt: Opt) -> Result<(), Error> {
	let config = gateway_util::config::read_config(&opt.config_file)?;
	info!("starting storage gateway, metadata_dir={}", config.metadata_dir.display());

	let built = wiring::build(&config).await?;

	let (runner, _must_exit) = gateway_util::background::BackgroundRunner::new();
	runner.spawn_worker(gateway_coordinator::ExpiryReaperWorker::new(built.coordinator.clone()));

	let state = std::sync::Arc::new(gateway_api::state::ApiState {
		coordinator: built.coordinator,
		chunk_uploader: built.chunk_uploader,
		facade: built.facade,
		index: built.index,
		jobs: built.jobs,
	});

	let shutdown = async {
		let _ = tokio::signal::ctrl_c().await;
		info!("received shutdown signal");
	};
	let result = server::serve(config.api_bind_addr, state, shutdown).await;
	runner.stop_all();
	result
}
