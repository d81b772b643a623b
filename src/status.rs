use std::fmt;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A status line for the status bar, tagged so errors can be told apart from progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub severity: Severity,
    pub text: String,
    /// Also write the message to the diagnostic console.
    pub echo: bool,
}

impl Status {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Status {
            severity,
            text: text.into(),
            echo: true,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Status::new(Severity::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Status::new(Severity::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Status::new(Severity::Error, text)
    }

    /// Status bar only, nothing on the console.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
