use std::path::Path;

/// Detect programming language from a file extension (lowercase, no dot).
pub fn detect_language(ext: &str) -> &'static str {
    match ext {
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "rs" => "rust",
        "py" | "pyi" | "pyw" => "python",
        "go" => "go",
        "java" => "java",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" | "cxx" | "hxx" => "cpp",
        "cs" => "csharp",
        "rb" | "rake" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "kt" | "kts" => "kotlin",
        "scala" | "sc" => "scala",
        "html" | "htm" => "html",
        "css" | "scss" | "sass" | "less" => "css",
        "json" | "jsonc" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" | "xsl" | "xslt" => "xml",
        "md" | "mdx" | "rst" => "markdown",
        "sql" => "sql",
        "graphql" | "gql" => "graphql",
        "sh" | "bash" | "zsh" | "fish" => "shell",
        "ps1" | "psm1" | "psd1" => "powershell",
        "bat" | "cmd" => "batch",
        "vue" => "vue",
        "svelte" => "svelte",
        "astro" => "astro",
        "lua" => "lua",
        "zig" => "zig",
        "nim" => "nim",
        "dart" => "dart",
        "ex" | "exs" => "elixir",
        "erl" | "hrl" => "erlang",
        "r" => "r",
        "jl" => "julia",
        "clj" | "cljs" | "cljc" => "clojure",
        "tf" | "hcl" => "hcl",
        "proto" => "protobuf",
        "ini" | "cfg" | "conf" => "ini",
        "env" => "dotenv",
        "txt" => "plaintext",
        _ => "plaintext",
    }
}

/// Language from a full path, falling back to well-known bare filenames.
pub fn detect_language_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if !ext.is_empty() {
        return detect_language(&ext);
    }
    match path
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .as_deref()
    {
        Some("dockerfile") => "dockerfile",
        Some("makefile") => "makefile",
        _ => "plaintext",
    }
}

/// Config-flavored languages get a boost for configuration-style queries.
pub fn is_config_language(language: &str) -> bool {
    matches!(
        language,
        "json" | "yaml" | "toml" | "xml" | "ini" | "dotenv" | "hcl"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_filenames_resolve() {
        assert_eq!(detect_language_for_path(Path::new("Dockerfile")), "dockerfile");
        assert_eq!(detect_language_for_path(Path::new("src/Makefile")), "makefile");
        assert_eq!(detect_language_for_path(Path::new("a/b.rs")), "rust");
    }

    #[test]
    fn config_languages_classified() {
        assert!(is_config_language("yaml"));
        assert!(!is_config_language("rust"));
    }
}
