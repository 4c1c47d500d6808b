//! Retrieval prompt
//!
//! Renders retrieved chunks and the user's question with the "stuff"
//! question-answering template: every chunk goes into a single prompt.

const PREAMBLE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// Question plus its supporting chunks
#[derive(Debug, Clone)]
pub struct GenerationPrompt<'a> {
    context: &'a [String],
    question: &'a str,
}

impl<'a> GenerationPrompt<'a> {
    pub fn new(context: &'a [String], question: &'a str) -> Self {
        Self { context, question }
    }

    pub fn render(&self) -> String {
        format!(
            "{PREAMBLE}\n\n{}\n\nQuestion: {}\nHelpful Answer:",
            self.context.join("\n\n"),
            self.question.trim()
        )
    }
}
