//! Front-end application state.
//!
//! `AppState` is owned by the command loop; the renderer and status
//! forwarder threads only hold clones of the engine's channels.

use std::path::PathBuf;

use myoscope_core::session::FormField;
use myoscope_core::SessionController;
use tracing::warn;

use crate::settings::{save_settings, AppSettings};

pub struct AppState {
    pub controller: SessionController,
    /// Persisted settings cache.
    pub settings: AppSettings,
    /// Absolute path to `settings.json`.
    pub settings_path: PathBuf,
    pub commands_handled: usize,
    pub commands_failed: usize,
}

impl AppState {
    /// Seed the operator forms from persisted settings.
    pub fn new(mut controller: SessionController, settings: AppSettings, settings_path: PathBuf) -> Self {
        let seeds = [
            (FormField::Subject, settings.subject.clone()),
            (FormField::Shift, settings.shift.clone()),
            (FormField::EmgScale, settings.emg_scale.to_string()),
            (FormField::MvcScale, settings.mvc_scale.to_string()),
        ];
        for (field, value) in seeds {
            if let Err(e) = controller.set_field(field, &value) {
                warn!("ignoring stored {field}: {e}");
            }
        }

        Self {
            controller,
            settings,
            settings_path,
            commands_handled: 0,
            commands_failed: 0,
        }
    }

    /// Copy the form values worth keeping into settings and save them.
    pub fn persist(&mut self) -> std::io::Result<()> {
        let subject = self.controller.subject_form();
        let calibration = self.controller.calibration_form();
        self.settings.subject = subject.name.clone();
        self.settings.shift = subject.shift.clone();
        self.settings.emg_scale = calibration.emg_scale;
        self.settings.mvc_scale = calibration.mvc_scale;
        save_settings(&self.settings_path, &self.settings)
    }
}
