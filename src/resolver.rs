//! Resolución de citas a ficheros PDF reales dentro de la carpeta de documentos.
//!
//! Estrategia por niveles, gana el primero con coincidencia:
//!   1. Ruta exacta `raíz/cita`.
//!   2. Mismo nombre de fichero sin distinguir mayúsculas.
//!   3. El nombre de la cita contenido en el nombre del fichero.
//!   4. Coincidencia difusa por fragmentos del nombre (sólo nombres largos).

use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::ViewerConfig;

const TARGET_EXTENSION: &str = "pdf";
/// Por debajo de esta longitud no se intenta la coincidencia difusa.
const FUZZY_MIN_NAME_LEN: usize = 10;
const FUZZY_MIN_TOKEN_LEN: usize = 3;

/// Nivel de la estrategia que produjo la coincidencia.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    CaseInsensitive,
    Substring,
    Fuzzy,
}

#[derive(Debug, Clone)]
pub struct DocumentResolver {
    config: ViewerConfig,
    inserted_marker: Regex,
    extension_tail: Regex,
}

impl DocumentResolver {
    pub fn new(config: ViewerConfig) -> Result<Self> {
        Ok(Self {
            config,
            inserted_marker: Regex::new(r"__eingefügt_am_.*")
                .context("Patrón de marca temporal inválido")?,
            extension_tail: Regex::new(r"\.pdf.*").context("Patrón de extensión inválido")?,
        })
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Raíz efectiva: la del contenedor si existe, si no la configurada.
    pub fn resolution_root(&self) -> Option<PathBuf> {
        if let Some(container) = &self.config.container_path {
            if container.exists() {
                return Some(container.clone());
            }
        }
        if self.config.documents_path.exists() {
            Some(self.config.documents_path.clone())
        } else {
            None
        }
    }

    pub fn resolve(&self, candidate: &str) -> Option<PathBuf> {
        self.resolve_with_tier(candidate).map(|(path, _)| path)
    }

    pub fn resolve_with_tier(&self, candidate: &str) -> Option<(PathBuf, MatchTier)> {
        if !self.config.enabled {
            return None;
        }
        let root = self.resolution_root()?;
        let candidate = candidate.trim();
        if candidate.is_empty() {
            return None;
        }

        if let Some(path) = exact_match(&root, candidate) {
            debug!("Cita '{candidate}' resuelta por ruta exacta: {}", path.display());
            return Some((path, MatchTier::Exact));
        }

        let base_name = Path::new(candidate)
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| candidate.to_lowercase());
        if base_name.is_empty() {
            return None;
        }

        // Un único recorrido por llamada, compartido por los niveles 2 a 4.
        let documents = list_documents(&root);
        let names: Vec<String> = documents
            .iter()
            .map(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().to_lowercase())
                    .unwrap_or_default()
            })
            .collect();

        let find = |pred: &dyn Fn(&str) -> bool| {
            names
                .iter()
                .position(|name| pred(name.as_str()))
                .map(|idx| documents[idx].clone())
        };

        let hit = find(&|name: &str| name == base_name)
            .map(|p| (p, MatchTier::CaseInsensitive))
            .or_else(|| find(&|name: &str| name.contains(&base_name)).map(|p| (p, MatchTier::Substring)))
            .or_else(|| {
                let key = self.fuzzy_key(&base_name)?;
                let tokens: Vec<&str> = key
                    .split('_')
                    .filter(|t| t.chars().count() > FUZZY_MIN_TOKEN_LEN)
                    .collect();
                find(&|name: &str| name.contains(&key) || tokens.iter().any(|t| name.contains(t)))
                    .map(|p| (p, MatchTier::Fuzzy))
            });

        match &hit {
            Some((path, tier)) => {
                debug!("Cita '{candidate}' resuelta ({tier:?}): {}", path.display())
            }
            None => debug!("Cita '{candidate}' sin documento en {}", root.display()),
        }
        hit
    }

    /// Clave difusa: nombre sin marca "eingefügt am" ni extensión.
    fn fuzzy_key(&self, base_name: &str) -> Option<String> {
        if base_name.chars().count() <= FUZZY_MIN_NAME_LEN {
            return None;
        }
        let key = self.inserted_marker.replace(base_name, "");
        let key = self.extension_tail.replace(&key, "").into_owned();
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    /// Nombres de los primeros `limit` PDF de la raíz efectiva.
    pub fn available_documents(&self, limit: usize) -> Vec<String> {
        let Some(root) = self.resolution_root() else {
            return Vec::new();
        };
        list_documents(&root)
            .iter()
            .take(limit)
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect()
    }
}

/// Nivel 1. Nunca sale de la raíz: rechaza rutas absolutas y `..`.
fn exact_match(root: &Path, candidate: &str) -> Option<PathBuf> {
    let relative = Path::new(candidate);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return None;
    }
    let path = root.join(relative);
    if path.is_file() && has_target_extension(&path) {
        Some(path)
    } else {
        None
    }
}

fn has_target_extension(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(TARGET_EXTENSION)
}

/// Recorre `root` recursivamente en orden de nombre y devuelve los PDF.
/// Sigue enlaces simbólicos; los ciclos se descartan como entradas con error.
fn list_documents(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && has_target_extension(e.path()))
        .map(|e| e.into_path())
        .collect()
}
