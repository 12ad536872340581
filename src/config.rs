use std::path::{Path, PathBuf};

/// Maximum allowed length for search queries (characters).
pub const MAX_SEARCH_QUERY_LENGTH: usize = 1000;

/// Canonical list of file extensions considered indexable.
/// The walker, the watcher, and the single-file re-index path all use this
/// one list so they never diverge.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // JavaScript / TypeScript
    "ts", "tsx", "js", "jsx", "mjs", "cjs",
    // Systems / compiled
    "rs", "py", "go", "java", "c", "cpp", "h", "hpp",
    "cs", "rb", "php", "swift", "kt", "scala",
    // Web
    "html", "css", "scss", "less", "sass",
    // Data / config
    "json", "yaml", "yml", "toml", "xml",
    // Documentation
    "md", "mdx", "txt", "rst",
    // Query / schema
    "sql", "graphql", "gql",
    // Shell
    "sh", "bash", "zsh", "fish", "ps1", "bat", "cmd",
    // Frontend frameworks
    "vue", "svelte", "astro",
    // Misc languages
    "lua", "zig", "nim", "dart", "ex", "exs",
    "r", "jl", "clj", "erl", "hrl",
    // Infra / IPC
    "tf", "hcl", "proto",
    // Dotfiles / config
    "env", "ini", "cfg", "conf",
];

/// Well-known files indexed regardless of extension.
pub const SUPPORTED_BARE_FILENAMES: &[&str] = &[
    "dockerfile", "makefile", "cmakelists.txt", "cargo.toml",
    "package.json", "tsconfig.json", "pyproject.toml",
    ".gitignore", ".eslintrc", ".prettierrc",
    "readme", "license", "changelog", "contributing",
];

pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext)
}

/// Directory names that are never indexed, even without a .gitignore.
pub fn is_excluded_directory(name: &str) -> bool {
    matches!(
        name,
        "node_modules"
            | ".git"
            | "target"
            | "dist"
            | "build"
            | "out"
            | "bin"
            | "obj"
            | ".next"
            | ".nuxt"
            | ".output"
            | ".vite"
            | ".turbo"
            | ".svelte-kit"
            | ".parcel-cache"
            | "__pycache__"
            | ".tox"
            | ".mypy_cache"
            | ".pytest_cache"
            | ".ruff_cache"
            | "coverage"
            | ".nyc_output"
            | ".cache"
            | "vendor"
            | ".gradle"
            | ".terraform"
            | ".eggs"
            | ".vs"
            | ".idea"
            | "__generated__"
            | ".cargo"
    ) || name.ends_with(".egg-info")
}

/// Skip paths that contain an excluded directory anywhere in them.
/// Used by both the walker and the watcher so they agree on what exists.
pub fn path_is_excluded(path: &Path) -> bool {
    for component in path.components() {
        if let std::path::Component::Normal(name) = component {
            if is_excluded_directory(name.to_string_lossy().as_ref()) {
                return true;
            }
        }
    }
    false
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of all engine state: `<base>/indexes/`, `<base>/symbols/`, `<base>/logs/`.
    pub base_dir: PathBuf,
    pub debug: bool,

    pub max_file_size_bytes: u64,
    /// Bytes scanned for NUL when deciding whether a file is binary.
    pub binary_sniff_bytes: usize,
    pub max_walk_depth: usize,

    /// Bound on simultaneously open per-workspace index contexts (LRU beyond it).
    pub max_open_indexes: usize,
    /// Tantivy writer RAM budget per workspace.
    pub writer_ram_budget_bytes: usize,
    /// Total pending-write ceiling across workspaces; exceeding it forces an
    /// early commit on the largest holder.
    pub ram_ceiling_bytes: u64,
    /// Documents per write batch before the pipeline yields.
    pub index_batch_size: usize,

    /// Reader max age before a search reopens it.
    pub reader_max_age_secs: u64,
    /// Writer lock acquisition timeout.
    pub writer_lock_timeout_secs: u64,

    pub watcher_debounce_ms: u64,
    pub watcher_queue_max: usize,
    pub autocommit_secs: u64,

    pub default_max_results: usize,
    pub default_token_budget: usize,
    /// Estimated tokens per hit, with and without snippet context.
    pub tokens_per_hit_bare: usize,
    pub tokens_per_hit_snippet: usize,

    /// Documents scanned at most by the stored-content regex fallback.
    pub regex_scan_cap: usize,

    pub repair_auto: bool,
}

impl EngineConfig {
    /// The only environment surface the engine reads: a base-dir override and
    /// a debug flag. Everything else is a tunable with a fixed default.
    pub fn from_env() -> Self {
        let base_dir = std::env::var("CODESEARCH_BASE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".coa")
                    .join("codesearch")
            });

        let debug = std::env::var("CODESEARCH_DEBUG")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            base_dir,
            debug,
            ..Self::default()
        }
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.base_dir.join("indexes")
    }

    pub fn symbols_dir(&self) -> PathBuf {
        self.base_dir.join("symbols")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from(".codesearch"),
            debug: false,
            max_file_size_bytes: 10 * 1024 * 1024,
            binary_sniff_bytes: 8192,
            max_walk_depth: 20,
            max_open_indexes: 16,
            writer_ram_budget_bytes: 50_000_000,
            ram_ceiling_bytes: 256 * 1024 * 1024,
            index_batch_size: 64,
            reader_max_age_secs: 30,
            writer_lock_timeout_secs: 30,
            watcher_debounce_ms: 2000,
            watcher_queue_max: 512,
            autocommit_secs: 10,
            default_max_results: 50,
            default_token_budget: 20_000,
            tokens_per_hit_bare: 100,
            tokens_per_hit_snippet: 200,
            regex_scan_cap: 5000,
            repair_auto: true,
        }
    }
}
