// Commandline argument parser using clap for crescendo and its monitor

use crate::config::CrescendoConfig;
use crate::telemetry::GateResolution;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct CrescendoArgs {
    #[command(subcommand)]
    /// Which task to perform
    pub command: CommandTask,

    /// RON configuration file; built-in defaults are used without one
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Serial port of the sensor, overrides the configuration file
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Play music while somebody is present
    #[command(about)]
    Run(RunCommand),

    /// Push the configured sensor parameters and read them back
    #[command(about)]
    Configure(ConfigureCommand),

    /// Print the parameters and firmware version stored on the sensor
    #[command(about)]
    Params,

    /// List serial ports
    #[command(about)]
    Ports,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct RunCommand {
    /// Seconds between presence checks
    #[arg(short = 'i', long = "check-interval")]
    pub check_interval: Option<f64>,

    /// Seconds without presence before the speaker is switched off
    #[arg(short = 'r', long = "relay-off-delay")]
    pub relay_off_delay: Option<f64>,

    /// Use a simulated sensor instead of the serial port
    #[arg(long)]
    pub simulate: bool,
}

/// Gate width, as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResolutionArg {
    /// 0.75 m per gate
    Coarse,
    /// 0.2 m per gate
    Fine,
}

impl From<ResolutionArg> for GateResolution {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::Coarse => GateResolution::Coarse,
            ResolutionArg::Fine => GateResolution::Fine,
        }
    }
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct ConfigureCommand {
    /// Turn engineering reports on or off
    #[arg(short = 'e', long = "engineering")]
    pub engineering: Option<bool>,

    /// Change the gate width (takes effect after a restart)
    #[arg(long = "resolution", value_enum)]
    pub resolution: Option<ResolutionArg>,

    /// Set every gate's motion and static sensitivity at once
    #[arg(long = "all-gates", num_args = 2, value_names = ["MOTION", "STATIC"])]
    pub all_gates: Option<Vec<u8>>,

    /// Restore factory settings instead of applying the configuration
    #[arg(long = "factory-reset")]
    pub factory_reset: bool,

    /// Restart the sensor when done
    #[arg(long = "restart")]
    pub restart: bool,
}

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct MonitorArgs {
    /// Serial port of the sensor; a selector is shown without one
    #[arg(short = 'p', long = "port")]
    pub port: Option<PathBuf>,

    /// RON configuration file for baud rate, timeouts and gate width
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Ask the sensor for per-gate energies
    #[arg(short = 'e', long = "engineering")]
    pub engineering: bool,

    /// Watch a simulated sensor instead
    #[arg(long)]
    pub simulate: bool,
}

impl CrescendoArgs {
    /// Applies command line overrides on top of `config`.
    pub fn apply(&self, config: &mut CrescendoConfig) {
        if let Some(port) = &self.port {
            config.sensor.port = port.clone();
        }
        if let CommandTask::Run(run) = &self.command {
            if let Some(interval) = run.check_interval {
                config.control.check_interval_s = interval;
            }
            if let Some(delay) = run.relay_off_delay {
                config.control.relay_off_delay_s = delay;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_overrides_apply() {
        let args = CrescendoArgs::parse_from([
            "crescendo",
            "run",
            "--port",
            "/dev/ttyUSB1",
            "--check-interval",
            "0.5",
            "--relay-off-delay",
            "60",
            "--simulate",
        ]);
        let mut config = CrescendoConfig::default();
        args.apply(&mut config);

        assert_eq!(config.sensor.port, "/dev/ttyUSB1");
        assert_eq!(config.control.check_interval_s, 0.5);
        assert_eq!(config.control.relay_off_delay_s, 60.0);
        assert!(matches!(args.command, CommandTask::Run(RunCommand { simulate: true, .. })));
    }

    #[test]
    fn configure_flags_parse() {
        let args = CrescendoArgs::parse_from([
            "crescendo",
            "configure",
            "--engineering",
            "true",
            "--resolution",
            "fine",
            "--all-gates",
            "40",
            "30",
        ]);
        match args.command {
            CommandTask::Configure(cmd) => {
                assert_eq!(cmd.engineering, Some(true));
                assert_eq!(cmd.resolution, Some(ResolutionArg::Fine));
                assert_eq!(cmd.all_gates, Some(vec![40, 30]));
                assert!(!cmd.factory_reset);
            }
            other => panic!("expected configure, got {:?}", other),
        }
    }

    #[test]
    fn cli_definitions_are_consistent() {
        use clap::CommandFactory;
        CrescendoArgs::command().debug_assert();
        MonitorArgs::command().debug_assert();
    }
}
