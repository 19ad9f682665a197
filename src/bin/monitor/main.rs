mod gui;

use clap::Parser;
use crescendo::{
    args::MonitorArgs,
    command::CommandEngine,
    config::CrescendoConfig,
    dummy_sensor::DummySensor,
    gui::device_selector,
    sensor_reader::{SensorReader, SharedSensorState},
    transport::{share, SerialTransport, SharedTransport, Transport},
};
use gui::engage_gui;
use log::warn;
use std::{error::Error, process::ExitCode};

fn main() -> ExitCode {
    // Anything louder than errors would scribble over the UI.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("error")).init();
    let args = MonitorArgs::parse();

    match monitor(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("monitor: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn monitor(args: &MonitorArgs) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => CrescendoConfig::load(path)?,
        None => CrescendoConfig::default(),
    };

    if args.simulate {
        let mut sensor = DummySensor::new();
        sensor.set_noise(0.05);
        return watch(share(sensor), "simulated sensor".into(), &config, args.engineering);
    }

    let port = match &args.port {
        Some(port) => port.clone(),
        None => match device_selector(SerialTransport::available_ports()?)? {
            Some(port) => port,
            None => return Ok(()),
        },
    };
    let transport = SerialTransport::open(
        &port,
        config.sensor.baud_rate,
        config.sensor.read_timeout(),
    )?;
    watch(
        share(transport),
        port.display().to_string(),
        &config,
        args.engineering,
    )
}

fn watch<T: Transport + 'static>(
    transport: SharedTransport<T>,
    source: String,
    config: &CrescendoConfig,
    engineering: bool,
) -> Result<(), Box<dyn Error>> {
    if engineering {
        let mut engine = CommandEngine::new(transport.clone(), config.sensor.command_options());
        if let Err(e) = engine.set_engineering_mode(true) {
            warn!("Could not enable engineering mode: {}", e);
        }
    }

    let state = SharedSensorState::new();
    let mut reader = SensorReader::spawn(transport, state.clone(), config.sensor.reader_options())?;

    let res = engage_gui(
        source,
        state,
        config.presence,
        config.control.check_interval(),
    );
    reader.stop(config.sensor.read_timeout() * 5);
    Ok(res?)
}
