use std::io::IsTerminal;

use anyhow::Context;
use clap::Parser;
use ota_harness_core::prelude::{init_logging, DELTA_GENERATOR, SIMG2IMG};
use ota_simulator::prelude::{DeltaGenerator, PayloadFileReader, Simg2Img, SimulateCli, Simulation};

fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = SimulateCli::parse();

    let delta_generator = DELTA_GENERATOR.resolve(cli.delta_generator.clone())?;
    let simg2img = SIMG2IMG.resolve(cli.simg2img.clone())?;
    log::debug!(
        "Using delta generator '{}' and converter '{}'",
        delta_generator.display(),
        simg2img.display()
    );

    let simulation = Simulation::new(
        PayloadFileReader,
        DeltaGenerator::from_path(delta_generator),
        Simg2Img::from_path(simg2img),
    );

    let options = cli.options(std::io::stdin().is_terminal());
    simulation
        .run(&options)
        .with_context(|| format!("Simulation of '{}' failed", options.payload.display()))?;

    println!("All partitions are valid");

    Ok(())
}
