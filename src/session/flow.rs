use std::fmt;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::generation::Style;

pub const PROMPT_MIN_CHARS: usize = 3;
pub const PROMPT_MAX_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WizardStep {
    #[default]
    Idle,
    AwaitingPhoto,
    AwaitingPrompt,
    AwaitingStyle,
}

impl fmt::Display for WizardStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WizardStep::Idle => "idle",
            WizardStep::AwaitingPhoto => "awaiting_photo",
            WizardStep::AwaitingPrompt => "awaiting_prompt",
            WizardStep::AwaitingStyle => "awaiting_style",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("prompt must be between 3 and 1000 characters, got {length}")]
    InvalidPrompt { length: usize },
    #[error("a photo (or an explicit skip) is expected before the prompt")]
    MissingPhoto,
    #[error("input is not accepted while {step}")]
    UnexpectedInput { step: WizardStep },
}

/// A downloaded photo. The backing temporary file is removed when this value is dropped.
#[derive(Debug)]
pub struct StoredPhoto {
    pub file_id: String,
    file: NamedTempFile,
}

impl StoredPhoto {
    pub fn new(file_id: impl Into<String>, file: NamedTempFile) -> Self {
        Self {
            file_id: file_id.into(),
            file,
        }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Everything collected by one wizard run, handed over when the style is picked.
#[derive(Debug)]
pub struct ReadyRequest {
    pub prompt: String,
    pub style: Style,
    pub photo: Option<StoredPhoto>,
}

#[derive(Debug, Default)]
pub struct WizardSession {
    step: WizardStep,
    photo: Option<StoredPhoto>,
    prompt: Option<String>,
}

impl WizardSession {
    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn has_photo(&self) -> bool {
        self.photo.is_some()
    }

    #[cfg(test)]
    pub fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    pub fn is_idle(&self) -> bool {
        self.step == WizardStep::Idle
    }

    /// Begins a new run. An unfinished run is discarded first.
    pub fn start(&mut self) {
        self.reset();
        self.step = WizardStep::AwaitingPhoto;
    }

    pub fn submit_photo(&mut self, photo: StoredPhoto) -> Result<(), FlowError> {
        self.ensure_step(WizardStep::AwaitingPhoto)?;
        self.photo = Some(photo);
        self.step = WizardStep::AwaitingPrompt;
        Ok(())
    }

    pub fn skip_photo(&mut self) -> Result<(), FlowError> {
        self.ensure_step(WizardStep::AwaitingPhoto)?;
        self.photo = None;
        self.step = WizardStep::AwaitingPrompt;
        Ok(())
    }

    pub fn submit_prompt(&mut self, text: &str) -> Result<(), FlowError> {
        if self.step == WizardStep::AwaitingPhoto {
            return Err(FlowError::MissingPhoto);
        }
        self.ensure_step(WizardStep::AwaitingPrompt)?;

        let prompt = text.trim();
        let length = prompt.chars().count();
        if !(PROMPT_MIN_CHARS..=PROMPT_MAX_CHARS).contains(&length) {
            return Err(FlowError::InvalidPrompt { length });
        }

        self.prompt = Some(prompt.to_string());
        self.step = WizardStep::AwaitingStyle;
        Ok(())
    }

    pub fn submit_style(&mut self, style: Style) -> Result<ReadyRequest, FlowError> {
        self.ensure_step(WizardStep::AwaitingStyle)?;
        let Some(prompt) = self.prompt.take() else {
            self.reset();
            return Err(FlowError::UnexpectedInput {
                step: WizardStep::Idle,
            });
        };
        let photo = self.photo.take();
        self.step = WizardStep::Idle;
        Ok(ReadyRequest {
            prompt,
            style,
            photo,
        })
    }

    pub fn cancel(&mut self) -> Result<(), FlowError> {
        if self.is_idle() {
            return Err(FlowError::UnexpectedInput {
                step: WizardStep::Idle,
            });
        }
        self.reset();
        Ok(())
    }

    fn ensure_step(&self, step: WizardStep) -> Result<(), FlowError> {
        if self.step == step {
            Ok(())
        } else {
            Err(FlowError::UnexpectedInput { step: self.step })
        }
    }

    fn reset(&mut self) {
        self.photo = None;
        self.prompt = None;
        self.step = WizardStep::Idle;
    }
}
