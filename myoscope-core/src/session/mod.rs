//! `SessionController`: the named operator actions.
//!
//! The controller is the single owner of session context: the device, the
//! action catalog, the motion schedule, both operator forms and the MVC
//! state. It is driven from one thread (the front end). Stream-side state
//! (calibration scalars, recording flag, skip requests) lives in the
//! [`AcquisitionEngine`] and is shared with the extractor and the device
//! callback through atomics.
//!
//! ## Typical session
//!
//! ```text
//! scan → connect_to_device → record_mvc → pause_mvc (× motions)
//!      → calibrate → load_motion → start_record → stop_record → …
//! ```

pub mod actions;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    calibration::CalibrationSnapshot,
    classifier::ClassifierHandle,
    device::{connect_with_retry, DeviceAddress, EmgDevice, NotificationKind, RawStreamConfig},
    display::DisplayScale,
    engine::{AcquisitionEngine, DiagnosticsSnapshot, EngineConfig},
    error::{MyoscopeError, Result},
    ipc::events::SessionStatus,
    recording::{destination_path, RecordingSink},
};

use actions::{ActionCalibration, ActionCatalog, ActionRecord, MotionSchedule};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long one scan listens. Default: 2 s.
    pub scan_timeout: Duration,
    /// Connect attempts before giving up. Default: 3.
    pub connect_attempts: u32,
    pub connect_backoff: Duration,
    pub raw_stream: RawStreamConfig,
    /// Where timestamped session files are written.
    pub recordings_dir: PathBuf,
    /// Root of the `Subject_*/Shift_*` tree.
    pub output_root: PathBuf,
    /// Times each motion appears in the schedule. Default: 5.
    pub repetitions_per_motion: usize,
    /// Fixed shuffle seed, for reproducible sessions.
    pub schedule_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(2),
            connect_attempts: 3,
            connect_backoff: Duration::from_millis(500),
            raw_stream: RawStreamConfig::default(),
            recordings_dir: PathBuf::from("recordingfiles"),
            output_root: PathBuf::from("."),
            repetitions_per_motion: 5,
            schedule_seed: None,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<()> {
        self.raw_stream.validate()?;
        if self.connect_attempts == 0 {
            return Err(MyoscopeError::InvalidConfig(
                "connect_attempts must be > 0".into(),
            ));
        }
        if self.repetitions_per_motion == 0 {
            return Err(MyoscopeError::InvalidConfig(
                "repetitions_per_motion must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Display scale and target amplitude inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationForm {
    /// Vertical spacing between stacked channels.
    pub emg_scale: f32,
    /// Peak RMS the cue is scaled against.
    pub peak: f32,
    /// Fraction of the peak-to-baseline span the operator should reach.
    pub mvc_scale: f32,
}

impl Default for CalibrationForm {
    fn default() -> Self {
        Self {
            emg_scale: 20.0,
            peak: 0.0,
            mvc_scale: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectForm {
    pub name: String,
    pub motion: u8,
    pub repetition: u32,
    pub shift: String,
}

impl Default for SubjectForm {
    fn default() -> Self {
        Self {
            name: "1".into(),
            motion: 1,
            repetition: 1,
            shift: "0".into(),
        }
    }
}

/// Editable form fields, addressed by name from the front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormField {
    EmgScale,
    Peak,
    MvcScale,
    Subject,
    Motion,
    Repetition,
    Shift,
}

impl FromStr for FormField {
    type Err = MyoscopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "emg-scale" | "scale" => Ok(Self::EmgScale),
            "peak" => Ok(Self::Peak),
            "mvc-scale" => Ok(Self::MvcScale),
            "subject" | "name" => Ok(Self::Subject),
            "motion" => Ok(Self::Motion),
            "rep" | "repetition" => Ok(Self::Repetition),
            "shift" => Ok(Self::Shift),
            other => Err(MyoscopeError::InvalidInput(format!("unknown field '{other}'"))),
        }
    }
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::EmgScale => "emg-scale",
            Self::Peak => "peak",
            Self::MvcScale => "mvc-scale",
            Self::Subject => "subject",
            Self::Motion => "motion",
            Self::Repetition => "repetition",
            Self::Shift => "shift",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MvcState {
    Idle,
    Recording,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Collect,
    Inference,
}

/// Read-only view of the whole session for the front end.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub device: Option<DeviceAddress>,
    pub mode: OperatingMode,
    pub mvc: MvcState,
    pub recording: bool,
    pub action: Option<ActionRecord>,
    pub subject: SubjectForm,
    pub calibration_form: CalibrationForm,
    pub calibration: CalibrationSnapshot,
    pub amplitude: f32,
    pub schedule_remaining: usize,
    pub window_cursor: usize,
    pub diagnostics: DiagnosticsSnapshot,
}

pub struct SessionController {
    config: SessionConfig,
    device: Box<dyn EmgDevice>,
    connected: Option<DeviceAddress>,
    discovered: Vec<DeviceAddress>,
    engine: Arc<AcquisitionEngine>,
    display: Arc<DisplayScale>,
    catalog: ActionCatalog,
    schedule: MotionSchedule,
    calibration_form: CalibrationForm,
    subject_form: SubjectForm,
    mvc: MvcState,
    mode: OperatingMode,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        engine_config: EngineConfig,
        display: Arc<DisplayScale>,
        device: Box<dyn EmgDevice>,
    ) -> Result<Self> {
        config.validate()?;
        let recorder = Arc::new(RecordingSink::in_dir(&config.recordings_dir));
        let engine = Arc::new(AcquisitionEngine::new(engine_config, recorder)?);
        let schedule = MotionSchedule::shuffled(config.repetitions_per_motion, config.schedule_seed);

        Ok(Self {
            config,
            device,
            connected: None,
            discovered: Vec::new(),
            engine,
            display,
            catalog: ActionCatalog::default(),
            schedule,
            calibration_form: CalibrationForm::default(),
            subject_form: SubjectForm::default(),
            mvc: MvcState::Idle,
            mode: OperatingMode::Collect,
        })
    }

    pub fn engine(&self) -> &Arc<AcquisitionEngine> {
        &self.engine
    }

    pub fn display(&self) -> &Arc<DisplayScale> {
        &self.display
    }

    pub fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    pub fn calibration_form(&self) -> &CalibrationForm {
        &self.calibration_form
    }

    pub fn subject_form(&self) -> &SubjectForm {
        &self.subject_form
    }

    pub fn mvc_state(&self) -> MvcState {
        self.mvc
    }

    pub fn mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn connected_device(&self) -> Option<&DeviceAddress> {
        self.connected.as_ref()
    }

    pub fn discovered(&self) -> &[DeviceAddress] {
        &self.discovered
    }

    pub fn schedule_remaining(&self) -> usize {
        self.schedule.remaining()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.engine.status(),
            device: self.connected.clone(),
            mode: self.mode,
            mvc: self.mvc,
            recording: self.engine.recorder().is_recording(),
            action: self.catalog.get(self.subject_form.motion).ok().cloned(),
            subject: self.subject_form.clone(),
            calibration_form: self.calibration_form.clone(),
            calibration: self.engine.calibration().snapshot(),
            amplitude: self.display.amplitude(),
            schedule_remaining: self.schedule.remaining(),
            window_cursor: self.engine.cursor(),
            diagnostics: self.engine.diagnostics_snapshot(),
        }
    }

    // ── Device ───────────────────────────────────────────────────────────────

    /// Look for armbands. An empty result is not an error.
    pub fn scan(&mut self) -> Result<Vec<DeviceAddress>> {
        let previous = self.engine.status();
        self.engine.set_status(SessionStatus::Scanning, None);
        let found = match self.device.scan(self.config.scan_timeout) {
            Ok(found) => found,
            Err(e) => {
                self.engine.set_status(SessionStatus::Error, Some(e.to_string()));
                return Err(e);
            }
        };

        if found.is_empty() {
            info!("no bracelet was found");
        } else {
            info!(count = found.len(), "devices found");
        }
        self.engine.set_status(previous, None);
        self.discovered = found.clone();
        Ok(found)
    }

    /// Connect, configure raw streaming and start the extractor.
    ///
    /// On success the first motion is loaded.
    pub fn connect_to_device(&mut self, address: &DeviceAddress) -> Result<()> {
        if self.engine.is_running() {
            return Err(MyoscopeError::AlreadyRunning);
        }

        if let Err(e) = connect_with_retry(
            self.device.as_mut(),
            address,
            self.config.connect_attempts,
            self.config.connect_backoff,
        ) {
            self.engine.set_status(
                SessionStatus::Error,
                Some(format!("can not connect to address {address}, please scan again")),
            );
            return Err(e);
        }
        self.connected = Some(address.clone());
        self.engine
            .set_status(SessionStatus::Connected, Some(address.to_string()));

        if let Err(e) = self.open_stream() {
            self.engine.set_status(SessionStatus::Error, Some(e.to_string()));
            return Err(e);
        }

        self.load_action(1)?;
        info!(%address, "streaming");
        Ok(())
    }

    fn open_stream(&mut self) -> Result<()> {
        self.device.configure_raw_stream(&self.config.raw_stream)?;
        self.device.set_notification(NotificationKind::EmgRaw, true)?;

        let (ingest, consumer) = self.engine.open_stream()?;
        self.device.start_notification(ingest.into_callback())?;
        if let Err(e) = self.engine.start(consumer) {
            let _ = self.device.stop_notification();
            return Err(e);
        }
        Ok(())
    }

    // ── Calibration ──────────────────────────────────────────────────────────

    /// Apply the calibration form: stacking scale, cue amplitude and the
    /// current baseline as zero reference.
    pub fn calibrate(&mut self) -> Result<()> {
        let form = &self.calibration_form;
        let baseline = self.engine.calibration().baseline();
        let amplitude = form.mvc_scale * (form.peak - baseline);

        self.display.set_spacing(form.emg_scale);
        self.display.set_amplitude(amplitude);
        self.engine.calibration().set_zero_reference(Some(baseline));
        info!(baseline, amplitude, spacing = form.emg_scale, "calibrated");
        Ok(())
    }

    /// Start tracking baseline and peak for the current motion.
    pub fn record_mvc(&mut self) -> Result<()> {
        if self.mvc == MvcState::Recording {
            return Err(MyoscopeError::InvalidTransition("recording MVC"));
        }
        self.engine.calibration().begin_mvc();
        self.mvc = MvcState::Recording;
        info!(motion = self.subject_form.motion, "MVC recording");
        Ok(())
    }

    /// Commit the tracked baseline/peak to the current motion and move on to
    /// the next one.
    pub fn pause_mvc(&mut self) -> Result<ActionCalibration> {
        if self.mvc != MvcState::Recording {
            return Err(MyoscopeError::InvalidTransition("MVC is idle"));
        }
        let (baseline, peak) = self.engine.calibration().end_mvc();
        self.mvc = MvcState::Idle;

        let current = self.subject_form.motion;
        let calibration = ActionCalibration { baseline, peak };
        self.catalog.set_calibration(current, calibration)?;
        info!(motion = current, baseline, peak, "MVC stored");

        if let Err(e) = self.load_action(current.saturating_add(1)) {
            warn!("error during loading action: {e}");
        }
        Ok(calibration)
    }

    // ── Motions ──────────────────────────────────────────────────────────────

    /// Select a motion and re-apply its stored calibration, if any.
    pub fn load_action(&mut self, id: u8) -> Result<()> {
        let record = self.catalog.get(id)?;
        self.subject_form.motion = id;
        self.subject_form.repetition = record.repetitions;

        if let Some(cal) = record.calibration {
            self.calibration_form.peak = cal.span();
            self.display
                .set_amplitude(self.calibration_form.mvc_scale * cal.span());
            self.engine
                .calibration()
                .set_zero_reference(Some(cal.baseline));
        }
        info!(id, label = %record.label, repetitions = record.repetitions, "action loaded");
        Ok(())
    }

    /// Load the motion currently typed into the subject form.
    pub fn update_motion(&mut self) -> Result<()> {
        self.load_action(self.subject_form.motion)
    }

    /// Pop the next motion from the schedule.
    pub fn load_motion(&mut self) -> Result<u8> {
        if self.engine.recorder().is_recording() {
            return Err(MyoscopeError::InvalidTransition("recording"));
        }
        let id = self.schedule.pop_next()?;
        self.load_action(id)?;
        info!(id, left = self.schedule.remaining(), "random motion loaded");
        Ok(id)
    }

    // ── Recording ────────────────────────────────────────────────────────────

    /// Set the cue to the target amplitude and start a fresh session file.
    pub fn start_record(&mut self) -> Result<PathBuf> {
        let form = &self.calibration_form;
        self.display.set_amplitude(form.mvc_scale * form.peak);
        self.engine.recorder().start()?;
        Ok(self.engine.recorder().session_path().to_path_buf())
    }

    /// Close the session file and copy it to `destination`, defaulting to
    /// the subject/shift/motion/repetition path. The motion's repetition
    /// count only advances when the copy succeeds.
    pub fn stop_record(&mut self, destination: Option<PathBuf>) -> Result<PathBuf> {
        let recorder = Arc::clone(self.engine.recorder());
        recorder.stop()?;

        let form = &self.subject_form;
        let destination = destination.unwrap_or_else(|| {
            destination_path(
                &self.config.output_root,
                &form.name,
                &form.shift,
                form.motion,
                form.repetition,
            )
        });

        recorder.save_copy(&destination)?;
        let repetitions = self.catalog.increment_repetitions(form.motion)?;
        info!(motion = form.motion, repetitions, "repetition saved");
        Ok(destination)
    }

    /// Jump the extractor past pending samples.
    pub fn skip_signal(&mut self) -> usize {
        let amount = self.engine.request_skip();
        info!(amount, "signal skip requested");
        amount
    }

    // ── Classifier ───────────────────────────────────────────────────────────

    pub fn train_model(&mut self, classifier: ClassifierHandle) -> Result<()> {
        self.engine.classifier().install(classifier);
        self.mode = OperatingMode::Inference;
        info!("classifier installed");
        Ok(())
    }

    pub fn back_to_collect(&mut self) -> Result<()> {
        self.engine.classifier().clear();
        self.mode = OperatingMode::Collect;
        info!("back to collection mode");
        Ok(())
    }

    // ── Forms ────────────────────────────────────────────────────────────────

    /// Parse and store one form field. Editing the motion reloads it.
    pub fn set_field(&mut self, field: FormField, value: &str) -> Result<()> {
        let value = value.trim();
        match field {
            FormField::EmgScale => self.calibration_form.emg_scale = parse_positive(field, value)?,
            FormField::Peak => self.calibration_form.peak = parse_finite(field, value)?,
            FormField::MvcScale => self.calibration_form.mvc_scale = parse_finite(field, value)?,
            FormField::Subject => self.subject_form.name = parse_label(field, value)?,
            FormField::Shift => self.subject_form.shift = parse_label(field, value)?,
            FormField::Repetition => self.subject_form.repetition = parse_number(field, value)?,
            FormField::Motion => self.load_action(parse_number(field, value)?)?,
        }
        Ok(())
    }

    /// Stop recording, notifications and the extractor.
    ///
    /// Driver failures are logged; the extractor is stopped regardless.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.engine.recorder().is_recording() {
            if let Err(e) = self.engine.recorder().stop() {
                warn!("failed to close recording: {e}");
            }
        }
        if let Some(address) = self.connected.take() {
            if let Err(e) = self.device.stop_notification() {
                warn!(%address, "failed to stop notifications: {e}");
            }
        }
        if self.engine.is_running() {
            self.engine.stop()?;
        }
        self.engine.set_status(SessionStatus::Disconnected, None);
        Ok(())
    }
}

fn invalid(field: FormField, value: &str) -> MyoscopeError {
    MyoscopeError::InvalidInput(format!("invalid {field} '{value}'"))
}

fn parse_finite(field: FormField, value: &str) -> Result<f32> {
    value
        .parse::<f32>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| invalid(field, value))
}

fn parse_positive(field: FormField, value: &str) -> Result<f32> {
    parse_finite(field, value).and_then(|v| if v > 0.0 { Ok(v) } else { Err(invalid(field, value)) })
}

fn parse_number<T: FromStr>(field: FormField, value: &str) -> Result<T> {
    value.parse().map_err(|_| invalid(field, value))
}

/// Subject and shift become directory names.
fn parse_label(field: FormField, value: &str) -> Result<String> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(value.to_string())
    } else {
        Err(invalid(field, value))
    }
}
