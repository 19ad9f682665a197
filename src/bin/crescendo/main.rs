//! The presence-activated music player.

use clap::Parser;
use crescendo::{
    actuator::{CommandPlayer, HidrawRelay},
    args::{CommandTask, ConfigureCommand, CrescendoArgs},
    command::{CommandEngine, DeviceParameters},
    config::CrescendoConfig,
    controller::Controller,
    dummy_sensor::DummySensor,
    sensor_reader::{SensorReader, SharedSensorState},
    transport::{share, SerialTransport, SharedTransport, Transport},
};
use log::{error, info, warn};
use std::{error::Error, process::ExitCode, sync::mpsc, time::Duration};

// Example:
// cargo run --bin crescendo -- --config crescendo.ron run
// cargo run --bin crescendo -- run --simulate --check-interval 0.5
// cargo run --bin crescendo -- --port /dev/ttyUSB0 params

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = CrescendoArgs::parse();

    let mut config = match &args.config {
        Some(path) => match CrescendoConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Could not load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => CrescendoConfig::default(),
    };
    args.apply(&mut config);

    let res = match &args.command {
        CommandTask::Run(run) if run.simulate => {
            info!("Using a simulated sensor");
            run_system(share(DummySensor::new()), &config)
        }
        CommandTask::Run(_) => open(&config).and_then(|t| run_system(t, &config)),
        CommandTask::Configure(cmd) => open(&config).and_then(|t| configure(t, &config, cmd)),
        CommandTask::Params => open(&config).and_then(|t| params(t, &config)),
        CommandTask::Ports => ports(),
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn open(config: &CrescendoConfig) -> Result<SharedTransport<SerialTransport>, Box<dyn Error>> {
    let transport = SerialTransport::open(
        &config.sensor.port,
        config.sensor.baud_rate,
        config.sensor.read_timeout(),
    )?;
    Ok(share(transport))
}

fn run_system<T: Transport + 'static>(
    transport: SharedTransport<T>,
    config: &CrescendoConfig,
) -> Result<(), Box<dyn Error>> {
    if config.sensor.configure_on_start {
        let mut engine = CommandEngine::new(transport.clone(), config.sensor.command_options());
        if let Err(e) = engine.configure(&config.sensor.parameters) {
            warn!(
                "Failed to configure sensor ({}), continuing with its current configuration",
                e
            );
        }
    }

    let state = SharedSensorState::new();
    let mut reader = SensorReader::spawn(
        transport.clone(),
        state.clone(),
        config.sensor.reader_options(),
    )?;

    if config.audio.tracks.is_empty() {
        warn!("No tracks configured, presence will not play anything");
    }
    let mut controller = Controller::new(
        CommandPlayer::new(config.audio.clone()),
        HidrawRelay::from_config(&config.relay),
        config.presence,
        config.control,
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    controller.run(&state, config.control.check_interval(), &rx);

    let stop_timeout = config.sensor.read_timeout() * 5 + Duration::from_millis(100);
    if !reader.stop(stop_timeout) {
        warn!("Releasing the sensor with its reader still running");
    }
    info!("Crescendo stopped");
    Ok(())
}

fn print_parameters(params: &DeviceParameters) {
    let p = &params.parameters;
    println!("Max gate:            {}", params.max_gate);
    println!("Max motion gate:     {}", p.max_motion_gate);
    println!("Max static gate:     {}", p.max_static_gate);
    println!("No-one duration:     {} s", p.no_one_duration_s);
    println!("Motion sensitivity:  {:?}", p.motion_sensitivity);
    println!("Static sensitivity:  {:?}", p.static_sensitivity);
}

fn configure<T: Transport>(
    transport: SharedTransport<T>,
    config: &CrescendoConfig,
    cmd: &ConfigureCommand,
) -> Result<(), Box<dyn Error>> {
    let mut engine = CommandEngine::new(transport, config.sensor.command_options());

    if cmd.factory_reset {
        engine.factory_reset()?;
        info!("Factory settings restored");
    } else {
        engine.configure(&config.sensor.parameters)?;
    }
    if let Some(values) = &cmd.all_gates {
        engine.set_all_gates_sensitivity(values[0], values[1])?;
    }
    if let Some(resolution) = cmd.resolution {
        engine.set_distance_resolution(resolution.into())?;
    }
    if let Some(enabled) = cmd.engineering {
        engine.set_engineering_mode(enabled)?;
    }
    if cmd.restart {
        engine.restart()?;
        info!("Sensor restarted");
    }

    print_parameters(&engine.read_parameters()?);
    Ok(())
}

fn params<T: Transport>(
    transport: SharedTransport<T>,
    config: &CrescendoConfig,
) -> Result<(), Box<dyn Error>> {
    let mut engine = CommandEngine::new(transport, config.sensor.command_options());
    println!("Firmware:            {}", engine.read_firmware()?);
    print_parameters(&engine.read_parameters()?);
    Ok(())
}

fn ports() -> Result<(), Box<dyn Error>> {
    let ports = SerialTransport::available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port.display());
    }
    Ok(())
}
