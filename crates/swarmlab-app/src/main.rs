use anyhow::Result;
use clap::Parser;
use swarmlab_app::{Cli, init_tracing};

fn main() -> Result<()> {
    init_tracing();
    Cli::parse().run()
}
