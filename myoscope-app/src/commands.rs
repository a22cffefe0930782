//! Line command handlers.
//!
//! Each command maps onto one controller action. Handlers return the text to
//! show the operator; errors are converted to `String` at this boundary.

use std::path::PathBuf;
use std::str::FromStr;

use myoscope_core::classifier::stub::StubClassifier;
use myoscope_core::session::FormField;
use myoscope_core::{ClassifierHandle, DeviceAddress};
use tracing::info;

use crate::state::AppState;

pub const HELP: &str = "\
commands:
  scan                      look for armbands
  connect [address]         connect (defaults to the first scanned device)
  calibrate                 apply scale/peak and zero the display at the baseline
  record-mvc | pause-mvc    start / commit a maximum voluntary contraction run
  start-record              start a fresh session file
  stop-record [path]        stop and save the session file
  load-motion               load the next random motion
  update-motion <id>        load motion <id>
  train-model | back-to-collect
  skip                      jump the window cursor forward
  set <field> <value>       fields: emg-scale peak mvc-scale subject motion rep shift
  status | help | quit";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Scan,
    Connect(Option<String>),
    Calibrate,
    RecordMvc,
    PauseMvc,
    StartRecord,
    StopRecord(Option<PathBuf>),
    LoadMotion,
    UpdateMotion(Option<u8>),
    TrainModel,
    BackToCollect,
    Skip,
    Set(FormField, String),
    Status,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut parts = line.split_whitespace();
        let name = parts.next().ok_or("empty command")?.to_ascii_lowercase();
        let arg = parts.next().map(str::to_string);

        let command = match name.replace('_', "-").as_str() {
            "scan" => Self::Scan,
            "connect" => Self::Connect(arg),
            "calibrate" => Self::Calibrate,
            "record-mvc" => Self::RecordMvc,
            "pause-mvc" => Self::PauseMvc,
            "start-record" => Self::StartRecord,
            "stop-record" => Self::StopRecord(arg.map(PathBuf::from)),
            "load-motion" => Self::LoadMotion,
            "update-motion" => Self::UpdateMotion(
                arg.map(|a| a.parse::<u8>().map_err(|_| format!("invalid motion id '{a}'")))
                    .transpose()?,
            ),
            "train-model" => Self::TrainModel,
            "back-to-collect" => Self::BackToCollect,
            "skip" => Self::Skip,
            "set" => {
                let field = arg.ok_or("usage: set <field> <value>")?;
                let field = field.parse::<FormField>().map_err(|e| e.to_string())?;
                let value = parts.collect::<Vec<_>>().join(" ");
                if value.is_empty() {
                    return Err(format!("usage: set {field} <value>"));
                }
                return Ok(Self::Set(field, value));
            }
            "status" => Self::Status,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(format!("unknown command '{other}', try 'help'")),
        };
        Ok(command)
    }
}

/// Run one command against the session.
pub fn dispatch(state: &mut AppState, command: Command) -> Result<String, String> {
    let result = run(state, command);
    match &result {
        Ok(_) => state.commands_handled += 1,
        Err(_) => state.commands_failed += 1,
    }
    result
}

fn run(state: &mut AppState, command: Command) -> Result<String, String> {
    let c = &mut state.controller;
    match command {
        Command::Scan => {
            let found = c.scan().map_err(|e| e.to_string())?;
            if found.is_empty() {
                return Ok("No bracelet was found".into());
            }
            let list = found.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            Ok(format!("Found {}: {list}", found.len()))
        }
        Command::Connect(address) => {
            let address = match address {
                Some(a) => DeviceAddress::from(a.as_str()),
                None => c
                    .discovered()
                    .first()
                    .cloned()
                    .ok_or("no scanned device, run 'scan' or pass an address")?,
            };
            c.connect_to_device(&address).map_err(|e| e.to_string())?;
            state.settings.device_address = Some(address.to_string());
            Ok(format!("Connected to {address}"))
        }
        Command::Calibrate => {
            c.calibrate().map_err(|e| e.to_string())?;
            Ok(format!("Calibrated, cue amplitude {:.4}", c.display().amplitude()))
        }
        Command::RecordMvc => {
            c.record_mvc().map_err(|e| e.to_string())?;
            Ok("Recording MVC...".into())
        }
        Command::PauseMvc => {
            let cal = c.pause_mvc().map_err(|e| e.to_string())?;
            Ok(format!(
                "MVC stored: baseline {:.4}, peak {:.4}; motion {} loaded",
                cal.baseline,
                cal.peak,
                c.subject_form().motion
            ))
        }
        Command::StartRecord => {
            let path = c.start_record().map_err(|e| e.to_string())?;
            Ok(format!("Recording to {}", path.display()))
        }
        Command::StopRecord(destination) => {
            let saved = c.stop_record(destination).map_err(|e| e.to_string())?;
            Ok(format!("Saved {}", saved.display()))
        }
        Command::LoadMotion => {
            let id = c.load_motion().map_err(|e| e.to_string())?;
            Ok(format!(
                "{}: {} ({} left)",
                id,
                action_label(state, id),
                state.controller.schedule_remaining()
            ))
        }
        Command::UpdateMotion(id) => {
            let loaded = match id {
                Some(id) => c.load_action(id),
                None => c.update_motion(),
            };
            loaded.map_err(|e| e.to_string())?;
            let id = state.controller.subject_form().motion;
            Ok(format!("{}: {}", id, action_label(state, id)))
        }
        Command::TrainModel => {
            c.train_model(ClassifierHandle::new(StubClassifier::default()))
                .map_err(|e| e.to_string())?;
            Ok("Classifier active, 'back-to-collect' to return to collection mode".into())
        }
        Command::BackToCollect => {
            c.back_to_collect().map_err(|e| e.to_string())?;
            Ok("Collection mode".into())
        }
        Command::Skip => Ok(format!("Skipping {} samples", c.skip_signal())),
        Command::Set(field, value) => {
            c.set_field(field, &value).map_err(|e| e.to_string())?;
            Ok(format!("{field} = {value}"))
        }
        Command::Status => {
            let snapshot = c.snapshot();
            info!(
                windows = snapshot.diagnostics.windows_processed,
                packets = snapshot.diagnostics.packets_in,
                "status requested"
            );
            serde_json::to_string_pretty(&snapshot).map_err(|e| e.to_string())
        }
        Command::Help => Ok(HELP.into()),
        Command::Quit => Ok("bye".into()),
    }
}

fn action_label(state: &AppState, id: u8) -> String {
    state
        .controller
        .catalog()
        .get(id)
        .map(|a| a.label.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::AppSettings;
    use myoscope_core::{SimulatedDevice, SimulatedDeviceConfig};
    use std::sync::Arc;

    fn state(dir: &std::path::Path) -> AppState {
        let settings = AppSettings {
            recordings_dir: dir.join("recordingfiles"),
            output_root: dir.to_path_buf(),
            schedule_seed: Some(5),
            extract_interval_ms: 5,
            ..AppSettings::default()
        };
        let controller = myoscope_core::SessionController::new(
            settings.session_config(),
            settings.engine_config(),
            Arc::new(myoscope_core::DisplayScale::from_config(&settings.display_config())),
            Box::new(SimulatedDevice::new(SimulatedDeviceConfig {
                seed: Some(1),
                ..SimulatedDeviceConfig::default()
            })),
        )
        .expect("controller");
        AppState::new(controller, settings, dir.join("settings.json"))
    }

    #[test]
    fn parses_action_surface() {
        assert_eq!("scan".parse::<Command>(), Ok(Command::Scan));
        assert_eq!(
            "connect AA:BB".parse::<Command>(),
            Ok(Command::Connect(Some("AA:BB".into())))
        );
        assert_eq!("record_mvc".parse::<Command>(), Ok(Command::RecordMvc));
        assert_eq!(
            "stop-record out/a.txt".parse::<Command>(),
            Ok(Command::StopRecord(Some(PathBuf::from("out/a.txt"))))
        );
        assert_eq!(
            "update-motion 4".parse::<Command>(),
            Ok(Command::UpdateMotion(Some(4)))
        );
        assert_eq!(
            "set mvc-scale 0.5".parse::<Command>(),
            Ok(Command::Set(FormField::MvcScale, "0.5".into()))
        );
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!("".parse::<Command>().is_err());
        assert!("dance".parse::<Command>().is_err());
        assert!("update-motion x".parse::<Command>().is_err());
        assert!("set peak".parse::<Command>().is_err());
        assert!("set colour red".parse::<Command>().is_err());
    }

    #[test]
    fn dispatch_counts_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut state = state(dir.path());

        assert!(dispatch(&mut state, Command::Connect(None)).is_err());
        assert!(dispatch(&mut state, Command::PauseMvc).is_err());
        let out = dispatch(&mut state, Command::UpdateMotion(Some(3))).expect("update");
        assert_eq!(out, "3: Ulnar Deviation");

        assert_eq!(state.commands_failed, 2);
        assert_eq!(state.commands_handled, 1);
    }

    #[test]
    fn scan_connect_record_and_persist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut state = state(dir.path());

        let scan = dispatch(&mut state, Command::Scan).expect("scan");
        assert!(scan.starts_with("Found 1"));
        dispatch(&mut state, Command::Connect(None)).expect("connect");
        dispatch(&mut state, "set subject 42".parse().expect("parse")).expect("set");
        dispatch(&mut state, Command::StartRecord).expect("start");
        let saved = dispatch(&mut state, Command::StopRecord(None)).expect("stop");
        assert!(saved.contains("Subject_42"));

        let status = dispatch(&mut state, Command::Status).expect("status");
        let json: serde_json::Value = serde_json::from_str(&status).expect("json");
        assert_eq!(json["subject"]["name"], "42");
        assert_eq!(json["status"], "streaming");

        state.controller.shutdown().expect("shutdown");
        state.persist().expect("persist");
        let reloaded = crate::settings::load_settings(&state.settings_path);
        assert_eq!(reloaded.subject, "42");
        assert!(reloaded.device_address.is_some());
    }
}
