//! Direct access to the AX8 resource tree.
use ax8::{components::prelude::*, devices::hardware::camera::ResourceValue, logging};
use clap::{Parser, Subcommand};
use color_eyre::eyre::WrapErr;
use std::path::PathBuf;

/// Arguments required for starting the program from the command line.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Url of the camera, `http://` is added when missing.
    #[arg(short, long)]
    url: String,
    /// Path to a yaml config file for the camera.
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,
    /// Print camera replies and per request detail.
    #[arg(short, long)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the raw reply for a resource, e.g. `.system.vcam.torch`.
    Get { resource: String },
    /// Write a value to a resource and print the raw reply.
    Set { resource: String, value: String },
    /// Measure the temperature at a pixel with the spot meter.
    Spot { x: u32, y: u32 },
    /// Print the state of all measurement boxes.
    Boxes,
    /// Write the effective configuration to a yaml file, a starting point
    /// for `--config`.
    WriteConfig { path: PathBuf },
    /// Program the camera to upload images over FTP on a schedule. Values
    /// not given here come from the config file, then from the defaults.
    Schedule {
        #[arg(long)]
        ftp: Option<String>,
        #[arg(long)]
        day: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        stop: Option<String>,
        #[arg(long)]
        interval: Option<String>,
    },
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    logging::init(args.debug)?;

    let config = match &args.config {
        Some(path) => Ax8Config::from_file(path)
            .wrap_err_with(|| format!("Loading config {}", path.display()))?,
        None => Ax8Config::default(),
    };
    let session = CameraSession::new(&args.url, args.debug)?;
    let client = ResourceClient::with_timeout(session, config.request_timeout())?;
    let controller = AcquisitionController::from_config(client, &config);

    match args.command {
        Commands::WriteConfig { path } => {
            config
                .to_file(&path)
                .wrap_err_with(|| format!("Writing config {}", path.display()))?;
        }
        Commands::Get { resource } => {
            println!("{}", controller.client().get_resource(&resource)?);
        }
        Commands::Set { resource, value } => {
            let reply = controller
                .client()
                .set_resource(&resource, &ResourceValue::from(value))?;
            println!("{reply}");
        }
        Commands::Spot { x, y } => {
            println!("{}", controller.temperature_at(x, y)?);
        }
        Commands::Boxes => {
            let boxes = controller.measurement_boxes()?;
            println!("{}", serde_yaml::to_string(&boxes)?);
        }
        Commands::Schedule {
            ftp,
            day,
            start,
            stop,
            interval,
        } => {
            let mut schedule = config.schedule.clone().unwrap_or_default();
            schedule.ftp = ftp.unwrap_or(schedule.ftp);
            schedule.day = day.unwrap_or(schedule.day);
            schedule.start = start.unwrap_or(schedule.start);
            schedule.stop = stop.unwrap_or(schedule.stop);
            schedule.interval = interval.unwrap_or(schedule.interval);
            controller.set_periodic_mode(&schedule)?;
        }
    }
    Ok(())
}
