//! Constantes del motor core.
//!
//! Agrupa valores estáticos que participan en el cálculo de fingerprints y
//! los límites por defecto del runtime. `ENGINE_VERSION` forma parte del
//! input del hashing de cascadas: cambiarla invalida fingerprints previos.

/// Versión lógica del motor. Se incluye en el fingerprint de cada cascada.
pub const ENGINE_VERSION: &str = "P1.0";

/// Tiempo máximo de una invocación `run` de un bloque.
pub const DEFAULT_BLOCK_TIMEOUT_MS: u64 = 5_000;

/// Tiempo máximo de espera por el lock lógico `(policy_id, user_id)` en cada intento.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;

/// Reintentos ante errores transitorios del state-store (y del lock).
pub const DEFAULT_STORE_RETRIES: u32 = 3;

/// Backoff base entre reintentos (se multiplica por el número de intento).
pub const RETRY_BACKOFF_MS: u64 = 15;

/// Nombre del evento de salida convencional que emiten la mayoría de bloques.
pub const RUN_EVENT: &str = "RunEvent";

/// Sufijo del espacio de claves de un dry-run: sus estados, colecciones y
/// journal viven bajo `<policy_id>#dry-run`, nunca bajo la clave viva.
pub const DRY_RUN_SCOPE_SUFFIX: &str = "#dry-run";
