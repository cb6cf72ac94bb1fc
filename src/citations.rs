//! Detección heurística de citas a documentos PDF dentro del texto de una respuesta.
//!
//! Cada regla es un `CitationMatcher` independiente; el extractor las aplica en
//! orden sobre el texto completo y une los resultados sin duplicados exactos.
//! Las reglas son heurísticas: habrá falsos positivos y falsos negativos.

use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::Regex;

/// Sufijo que añade el backend a los PDF convertidos a texto.
const CONVERTED_SUFFIX: &str = ".txt";
const PDF_EXTENSION: &str = ".pdf";

/// Una regla que encuentra citas candidatas en un texto.
pub trait CitationMatcher: Send + Sync {
    fn name(&self) -> &str;
    fn find(&self, text: &str) -> Vec<String>;
}

/// Regla basada en una expresión regular; la cita es el primer grupo de captura.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    name: &'static str,
    regex: Regex,
}

impl PatternMatcher {
    /// Compila `pattern` sin distinguir mayúsculas.
    pub fn new(name: &'static str, pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("(?i){pattern}"))
            .with_context(|| format!("Patrón de cita inválido ({name})"))?;
        Ok(Self { name, regex })
    }
}

impl CitationMatcher for PatternMatcher {
    fn name(&self) -> &str {
        self.name
    }

    fn find(&self, text: &str) -> Vec<String> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

/// Reglas por defecto, en orden de aplicación.
const DEFAULT_RULES: &[(&str, &str)] = &[
    ("bracketed", r"\[([^\[\]]+\.pdf)\]"),
    ("source", r"Source:\s*([^,\n]+\.pdf)"),
    ("quelle", r"Quelle:\s*([^,\n]+\.pdf)"),
    ("aus_dokument", r"aus\s+(?:dem\s+Dokument\s+)?([^,\s]+\.pdf)"),
    ("from", r"from\s+([^,\s]+\.pdf)"),
    ("converted", r"([A-Za-z0-9_€().-]+\.pdf)\.txt"),
    ("bare", r"(?:^|\s)([A-Za-z0-9_€().-]+\.pdf)(?:\s|$|[,.])"),
    // Segunda pasada sobre todo el texto para nombres convertidos con espacios.
    ("converted_multiword", r"([A-Za-z0-9_€().\s-]+\.pdf)\.txt"),
];

/// Extrae citas candidatas aplicando una lista ordenada de reglas.
pub struct CitationExtractor {
    matchers: Vec<Box<dyn CitationMatcher>>,
}

impl CitationExtractor {
    pub fn new() -> Result<Self> {
        let matchers = DEFAULT_RULES
            .iter()
            .map(|&(name, pattern)| {
                PatternMatcher::new(name, pattern).map(|m| Box::new(m) as Box<dyn CitationMatcher>)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { matchers })
    }

    pub fn with_matchers(matchers: Vec<Box<dyn CitationMatcher>>) -> Self {
        Self { matchers }
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.matchers.iter().map(|m| m.name()).collect()
    }

    /// Devuelve las citas distintas en orden de primera aparición por regla.
    pub fn extract(&self, text: &str) -> Vec<String> {
        let mut raw = Vec::new();
        for matcher in &self.matchers {
            raw.extend(matcher.find(text).iter().filter_map(|m| clean_match(m)));
        }

        let mut seen = HashSet::new();
        raw.into_iter()
            .map(strip_converted_suffix)
            .filter(|citation| seen.insert(citation.clone()))
            .collect()
    }
}

/// Quita espacios y la puntuación final (`.,;!?`); descarta resultados vacíos.
pub fn clean_match(raw: &str) -> Option<String> {
    let cleaned = raw
        .trim()
        .trim_end_matches(['.', ',', ';', '!', '?'])
        .trim_end();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// `nombre.pdf.txt` → `nombre.pdf`.
fn strip_converted_suffix(citation: String) -> String {
    let converted = format!("{PDF_EXTENSION}{CONVERTED_SUFFIX}");
    let start = citation.len().saturating_sub(converted.len());
    match citation.get(start..) {
        Some(tail) if tail.eq_ignore_ascii_case(&converted) => {
            citation[..citation.len() - CONVERTED_SUFFIX.len()].to_string()
        }
        _ => citation,
    }
}
