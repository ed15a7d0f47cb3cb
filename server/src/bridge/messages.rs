//! User-facing reply texts.

use crate::dispatch::DispatchError;

/// Texts pushed back to users for each outcome.
#[derive(Debug, Clone)]
pub struct ReplyMessages {
    /// Appended to every successful answer.
    pub answer_suffix: Option<String>,
    pub unavailable: String,
    pub timed_out: String,
    pub failed: String,
    pub busy: String,
}

impl Default for ReplyMessages {
    fn default() -> Self {
        Self {
            answer_suffix: None,
            unavailable: "The system is busy or cannot read the documents right now. Please try again later.".into(),
            timed_out: "Sorry, the query timed out. The question may be too complex or the system is busy. Please try again later.".into(),
            failed: "Sorry, something went wrong. Please try again later.".into(),
            busy: "Still working on your previous question. Please wait for the answer before asking another.".into(),
        }
    }
}

impl ReplyMessages {
    #[must_use]
    pub fn with_answer_suffix(mut self, suffix: Option<String>) -> Self {
        self.answer_suffix = suffix.filter(|s| !s.is_empty());
        self
    }

    /// Message for a finished query.
    pub fn format(&self, result: &Result<String, DispatchError>) -> String {
        match result {
            Ok(answer) if answer.trim().is_empty() => self.unavailable.clone(),
            Ok(answer) => match &self.answer_suffix {
                Some(suffix) => format!("{answer}{suffix}"),
                None => answer.clone(),
            },
            Err(DispatchError::SessionUnavailable(_)) => self.unavailable.clone(),
            Err(DispatchError::QueryTimeout(_)) => self.timed_out.clone(),
            Err(_) => self.failed.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_answer_with_suffix() {
        let messages = ReplyMessages::default().with_answer_suffix(Some("\n\n(AI generated)".into()));
        assert_eq!(
            messages.format(&Ok("20mg twice daily".into())),
            "20mg twice daily\n\n(AI generated)"
        );
    }

    #[test]
    fn test_empty_suffix_is_dropped() {
        let messages = ReplyMessages::default().with_answer_suffix(Some(String::new()));
        assert!(messages.answer_suffix.is_none());
        assert_eq!(messages.format(&Ok("yes".into())), "yes");
    }

    #[test]
    fn test_blank_answer_reads_as_unavailable() {
        let messages = ReplyMessages::default();
        assert_eq!(messages.format(&Ok("  ".into())), messages.unavailable);
    }

    #[test]
    fn test_failures_map_to_apologies() {
        let messages = ReplyMessages::default();
        assert_eq!(
            messages.format(&Err(DispatchError::SessionUnavailable("down".into()))),
            messages.unavailable
        );
        assert_eq!(
            messages.format(&Err(DispatchError::QueryTimeout(Duration::from_secs(45)))),
            messages.timed_out
        );
        assert_eq!(
            messages.format(&Err(DispatchError::QueryTransient("503".into()))),
            messages.failed
        );
        assert_eq!(
            messages.format(&Err(DispatchError::Aborted("panic".into()))),
            messages.failed
        );
    }
}
