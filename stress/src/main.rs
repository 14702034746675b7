use clap::Parser;
use ota_harness_core::prelude::{init_logging, ToolCommand, ADB, PYTHON, UPDATE_DEVICE};
use ota_harness_runner::prelude::{run, RunDefinition};
use ota_stress::prelude::{AdbShell, Device, StressCli, StressController, UpdateInstaller};

fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = StressCli::parse();

    let python = PYTHON.resolve(cli.python.clone())?;
    let helper = UPDATE_DEVICE.resolve(cli.helper.clone())?;
    let adb = ADB.resolve(cli.adb.clone())?;

    let mut helper = ToolCommand::new(python).with_arg(helper);
    if let Some(serial) = &cli.serial {
        helper = helper.with_env("ANDROID_SERIAL", serial);
    }
    let device = Device::new(AdbShell::new(ToolCommand::new(adb), cli.serial.clone()));

    let controller = StressController::new(
        &cli.otafile,
        device,
        UpdateInstaller::new(helper),
        cli.config(),
    )?;

    let summary = run(
        RunDefinition::from_args("ota_stress_test", &cli.runner),
        |ctx| {
            log::info!("Stress iteration {}", ctx.iteration());
            controller.run_iteration(ctx.executor()).map(|_| ())
        },
    )?;

    if summary.stopped {
        println!("Stopped after {} iteration(s)", summary.completed);
    }

    Ok(())
}
