//! Convierte las citas resolubles de una respuesta en enlaces interactivos al visor.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use crate::citations::CitationExtractor;
use crate::config::ViewerConfig;
use crate::models::ContentFormat;
use crate::resolver::DocumentResolver;

/// Cita que apunta a un fichero existente.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedCitation {
    pub citation: String,
    pub path: PathBuf,
}

/// Texto anotado junto con las citas detectadas y las resueltas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnnotatedAnswer {
    pub text: String,
    /// `Html` sólo si todo el texto fuera de los marcadores está escapado.
    pub format: ContentFormat,
    /// Todas las citas candidatas, resueltas o no.
    pub citations: Vec<String>,
    pub resolved: Vec<ResolvedCitation>,
}

/// Combina extractor y resolvedor. Barato de clonar.
#[derive(Clone)]
pub struct CitationAnnotator {
    extractor: Arc<CitationExtractor>,
    resolver: Arc<DocumentResolver>,
}

impl CitationAnnotator {
    pub fn new(extractor: CitationExtractor, resolver: DocumentResolver) -> Self {
        Self {
            extractor: Arc::new(extractor),
            resolver: Arc::new(resolver),
        }
    }

    pub fn from_config(viewer: &ViewerConfig) -> Result<Self> {
        Ok(Self::new(
            CitationExtractor::new()?,
            DocumentResolver::new(viewer.clone())?,
        ))
    }

    pub fn enabled(&self) -> bool {
        self.resolver.enabled()
    }

    pub fn extractor(&self) -> &CitationExtractor {
        &self.extractor
    }

    pub fn resolver(&self) -> &DocumentResolver {
        &self.resolver
    }

    /// Sin visor devuelve el texto intacto y ninguna cita.
    pub fn annotate(&self, text: &str) -> AnnotatedAnswer {
        if !self.enabled() {
            return AnnotatedAnswer {
                text: text.to_string(),
                ..Default::default()
            };
        }

        let citations = self.extractor.extract(text);
        let resolved: Vec<ResolvedCitation> = citations
            .iter()
            .filter_map(|citation| {
                self.resolver.resolve(citation).map(|path| ResolvedCitation {
                    citation: citation.clone(),
                    path,
                })
            })
            .collect();

        let names: Vec<&str> = resolved.iter().map(|r| r.citation.as_str()).collect();
        AnnotatedAnswer {
            text: replace_citations(text, &names),
            format: ContentFormat::Html,
            citations,
            resolved,
        }
    }
}

/// Marcador HTML que el frontend convierte en un botón del visor.
pub fn citation_marker(citation: &str) -> String {
    let escaped = escape_html(citation);
    format!(r#"<span class="citation-link" data-citation="{escaped}">{escaped}</span>"#)
}

/// Sustituye todas las apariciones en una sola pasada sobre el texto original.
/// Las citas más largas reservan su tramo primero; los solapes se descartan.
/// El texto entre marcadores sale escapado.
fn replace_citations(text: &str, citations: &[&str]) -> String {
    let mut ordered: Vec<&str> = citations.iter().copied().filter(|c| !c.is_empty()).collect();
    ordered.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    let mut spans: Vec<(usize, usize, &str)> = Vec::new();
    for citation in ordered {
        for (start, _) in text.match_indices(citation) {
            let end = start + citation.len();
            if spans.iter().all(|&(s, e, _)| end <= s || start >= e) {
                spans.push((start, end, citation));
            }
        }
    }
    spans.sort_by_key(|&(start, _, _)| start);

    let mut out = String::with_capacity(text.len() + spans.len() * 64);
    let mut cursor = 0;
    for (start, end, citation) in spans {
        out.push_str(&escape_html(&text[cursor..start]));
        out.push_str(&citation_marker(citation));
        cursor = end;
    }
    out.push_str(&escape_html(&text[cursor..]));
    out
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
