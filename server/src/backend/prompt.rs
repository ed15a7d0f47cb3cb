//! Prompt Builder
//!
//! Wraps a user's question in an answering instruction. Questions that ask
//! for detail get the detailed instruction; everything else gets the
//! concise one.

/// Words that switch a question to the detailed answer mode.
pub const DETAIL_KEYWORDS: [&str; 2] = ["詳細", "detail"];

/// How much the backend should say.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerMode {
    Concise,
    Detailed,
}

impl AnswerMode {
    /// Mode requested by a question. Keyword matching ignores case.
    pub fn for_question(question: &str) -> Self {
        let lowered = question.to_lowercase();
        if DETAIL_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            Self::Detailed
        } else {
            Self::Concise
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Concise => "concise",
            Self::Detailed => "detailed",
        }
    }
}

/// Instructions appended to questions, one per answer mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBuilder {
    pub concise: String,
    pub detailed: String,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            concise: "Based on the source documents, answer briefly with a summary of the key points."
                .into(),
            detailed: "Based on the source documents, give a detailed professional answer and include the key data."
                .into(),
        }
    }
}

impl PromptBuilder {
    /// Override either instruction; `None` keeps the default.
    #[must_use]
    pub fn with_instructions(mut self, concise: Option<String>, detailed: Option<String>) -> Self {
        if let Some(concise) = concise {
            self.concise = concise;
        }
        if let Some(detailed) = detailed {
            self.detailed = detailed;
        }
        self
    }

    /// Full prompt for a question, with the mode it was built for.
    pub fn build(&self, question: &str) -> (String, AnswerMode) {
        let mode = AnswerMode::for_question(question);
        let instruction = match mode {
            AnswerMode::Concise => &self.concise,
            AnswerMode::Detailed => &self.detailed,
        };
        let instruction = instruction.trim();
        let prompt = if instruction.is_empty() {
            question.to_string()
        } else {
            format!("{question} {instruction}")
        };
        (prompt, mode)
    }
}
