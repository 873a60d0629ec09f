//! Prompt construction and the citation map that goes with it.

use docrag_core::{Citation, RetrievalResult};

/// Sources keyed by their prompt marker. Marker `n` is stored at position `n - 1`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CitationMap {
    citations: Vec<Citation>,
}

impl CitationMap {
    pub fn from_results(results: &[RetrievalResult]) -> Self {
        let citations = results
            .iter()
            .enumerate()
            .map(|(i, r)| Citation {
                marker: i + 1,
                chunk_id: r.chunk_id.clone(),
                title: r.title.clone(),
                url: r.url.clone(),
                heading: r.heading.clone(),
                snippet: r.snippet.clone(),
                similarity: r.similarity,
            })
            .collect();
        Self { citations }
    }

    pub fn resolve(&self, marker: usize) -> Option<&Citation> {
        marker.checked_sub(1).and_then(|i| self.citations.get(i))
    }

    pub fn len(&self) -> usize { self.citations.len() }
    pub fn is_empty(&self) -> bool { self.citations.is_empty() }
    pub fn iter(&self) -> impl Iterator<Item = &Citation> { self.citations.iter() }
    pub fn into_vec(self) -> Vec<Citation> { self.citations }
}

#[derive(Debug, Clone)]
pub struct AssembledPrompt {
    pub prompt: String,
    pub citations: CitationMap,
}

/// Stated when retrieval found nothing; the model is told to repeat it.
pub const NO_CONTEXT_NOTICE: &str = "No relevant documentation was found for this question.";

#[derive(Debug, Clone)]
pub struct PromptAssembler {
    subject: String,
}

impl PromptAssembler {
    /// `subject` names what the documentation covers, e.g. "VASP (Vienna Ab initio Simulation Package)".
    pub fn new(subject: impl Into<String>) -> Self { Self { subject: subject.into() } }

    pub fn assemble(&self, question: &str, results: &[RetrievalResult]) -> AssembledPrompt {
        let mut prompt = self.instructions();
        prompt.push_str("\n\n");
        if results.is_empty() {
            prompt.push_str(NO_CONTEXT_NOTICE);
            prompt.push_str("\n\n");
            prompt.push_str(&format!("User Question: {question}\n\n"));
            prompt.push_str(
                "Tell the user that the documentation does not cover this question. \
                 Do not invent an answer and do not cite any sources.",
            );
        } else {
            prompt.push_str("Context from the documentation:\n\n");
            prompt.push_str(&context_blocks(results));
            prompt.push_str("\n\n");
            prompt.push_str(&format!("User Question: {question}\n\n"));
            prompt.push_str(
                "Answer the question using only the context above. Cite the context blocks you \
                 rely on with their markers, for example [1] or [2].",
            );
        }
        AssembledPrompt { prompt, citations: CitationMap::from_results(results) }
    }

    fn instructions(&self) -> String {
        format!(
            "You are a helpful assistant answering questions about {} based on the provided documentation.\n\n\
             Instructions:\n\
             - Use only the provided context to answer\n\
             - Cite the context blocks you use with their bracketed markers, such as [1]\n\
             - If the context doesn't contain enough information, say so clearly\n\
             - Be concise but thorough and use technical terminology correctly",
            self.subject
        )
    }
}

fn context_blocks(results: &[RetrievalResult]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let mut block = format!("[{}] Source: {}", i + 1, r.title);
            if let Some(heading) = r.heading.as_deref().filter(|h| !h.is_empty()) {
                block.push_str(" - ");
                block.push_str(heading);
            }
            block.push_str(&format!("\nURL: {}\nContent:\n{}\n", r.url, r.text));
            block
        })
        .collect::<Vec<_>>()
        .join("\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(n: usize, heading: Option<&str>) -> RetrievalResult {
        RetrievalResult {
            chunk_id: format!("c{n}"),
            document_id: format!("d{n}"),
            similarity: 0.9 - n as f32 * 0.1,
            snippet: format!("snippet {n}"),
            text: format!("full text {n}"),
            heading: heading.map(str::to_string),
            title: format!("Page {n}"),
            url: format!("https://wiki/{n}"),
        }
    }

    #[test]
    fn markers_are_contiguous_and_resolve_in_order() {
        let results = vec![result(1, Some("Tags")), result(2, None), result(3, Some(""))];
        let assembled = PromptAssembler::new("VASP").assemble("What is ENCUT?", &results);

        assert_eq!(assembled.citations.len(), 3);
        for (i, c) in assembled.citations.iter().enumerate() {
            assert_eq!(c.marker, i + 1);
            assert_eq!(c.chunk_id, results[i].chunk_id);
        }
        assert!(assembled.citations.resolve(0).is_none());
        assert!(assembled.citations.resolve(4).is_none());
        assert_eq!(assembled.citations.resolve(2).map(|c| c.title.as_str()), Some("Page 2"));

        let p = &assembled.prompt;
        assert!(p.contains("[1] Source: Page 1 - Tags\nURL: https://wiki/1\nContent:\nfull text 1"));
        assert!(p.contains("[2] Source: Page 2\nURL: https://wiki/2"));
        assert!(p.contains("[3] Source: Page 3\nURL"));
        assert!(p.contains("\n---\n"));
        assert!(p.contains("User Question: What is ENCUT?"));
        assert!(p.find("[1] Source").unwrap() < p.find("[2] Source").unwrap());
    }

    #[test]
    fn empty_results_produce_no_context_prompt() {
        let assembled = PromptAssembler::new("VASP").assemble("What is ENCUT?", &[]);
        assert!(assembled.citations.is_empty());
        assert!(assembled.prompt.contains(NO_CONTEXT_NOTICE));
        assert!(assembled.prompt.contains("Do not invent an answer"));
        assert!(!assembled.prompt.contains("Source:"));
    }
}
