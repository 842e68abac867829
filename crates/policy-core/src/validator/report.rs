use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockReport {
    pub uuid: String,
    pub name: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

/// Reporte de publicación: `{ blocks: [...], errors: [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub blocks: Vec<BlockReport>,
    /// Errores comunes (no atribuibles a un único bloque).
    pub errors: Vec<String>,
}

impl ValidationReport {
    /// Publicable sólo con cero errores; los warnings no bloquean.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.blocks.iter().all(|b| b.is_valid)
    }

    pub fn error_count(&self) -> usize {
        self.errors.len() + self.blocks.iter().map(|b| b.errors.len()).sum::<usize>()
    }

    pub fn warning_count(&self) -> usize {
        self.blocks.iter().map(|b| b.warnings.len()).sum()
    }

    pub fn block(&self, uuid: &str) -> Option<&BlockReport> {
        self.blocks.iter().find(|b| b.uuid == uuid)
    }
}
