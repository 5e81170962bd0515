//! CLI subcommands other than `serve`.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

const MODEL_URL: &str = "https://huggingface.co/sentence-transformers/\
paraphrase-multilingual-MiniLM-L12-v2/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str = "https://huggingface.co/sentence-transformers/\
paraphrase-multilingual-MiniLM-L12-v2/resolve/main/tokenizer.json";

/// Download the ONNX embedding model and tokenizer to the cache directory.
pub async fn model_download(config: &rune::config::EmbeddingConfig) -> Result<()> {
    let cache_dir = rune::config::expand_tilde(&config.cache_dir);
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("failed to create cache dir: {}", cache_dir.display()))?;

    let model_path = cache_dir.join("model.onnx");
    let tokenizer_path = cache_dir.join("tokenizer.json");

    if model_path.exists() {
        println!("Model already exists at {}", model_path.display());
    } else {
        println!("Downloading model.onnx (~470MB)...");
        download_file(MODEL_URL, &model_path).await?;
        println!("Model saved to {}", model_path.display());
    }

    if tokenizer_path.exists() {
        println!("Tokenizer already exists at {}", tokenizer_path.display());
    } else {
        println!("Downloading tokenizer.json...");
        download_file(TOKENIZER_URL, &tokenizer_path).await?;
        println!("Tokenizer saved to {}", tokenizer_path.display());
    }

    println!("Model download complete.");
    Ok(())
}

/// Run installation diagnostics and print a health report.
pub async fn doctor(config: &rune::config::RuneConfig) -> Result<()> {
    use rune::vault::ScoreVault;

    let config_path = rune::config::default_config_path();

    println!("Rune Health Report");
    println!("==================");
    println!();
    println!("Config file:       {}", config_path.display());
    if !config_path.exists() {
        println!("  Status:          not found (defaults in effect, state dormant)");
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&config_path)?.permissions().mode() & 0o777;
            if mode == 0o600 {
                println!("  Permissions:     0600 (OK)");
            } else {
                println!("  Permissions:     {mode:04o} — WARNING: should be 0600");
            }
        }
    }

    println!("State:             {:?}", config.state);
    let missing = config.missing_for_active();
    if missing.is_empty() {
        println!("Activation:        all required fields populated");
    } else {
        println!("Activation:        missing {}", missing.join(", "));
    }
    println!();

    let cache_dir = rune::config::expand_tilde(&config.embedding.cache_dir);
    let model_ok = cache_dir.join("model.onnx").exists();
    let tokenizer_ok = cache_dir.join("tokenizer.json").exists();
    println!("Embedding model:   {}", config.embedding.model);
    println!(
        "  model.onnx:      {}",
        if model_ok { "present" } else { "missing — run `rune model download`" }
    );
    println!(
        "  tokenizer.json:  {}",
        if tokenizer_ok { "present" } else { "missing — run `rune model download`" }
    );
    println!();

    let providers = [
        ("anthropic", !config.llm.anthropic_api_key.is_empty()),
        ("openai", !config.llm.openai_api_key.is_empty()),
        ("google", !config.llm.google_api_key.is_empty()),
    ];
    let keyed: Vec<&str> = providers.iter().filter(|(_, k)| *k).map(|(n, _)| *n).collect();
    println!("LLM provider:      {} (tier2: {})", config.llm.provider, config.llm.tier2_provider);
    if keyed.is_empty() {
        println!("  API keys:        none — pipelines will degrade to minimal records");
    } else {
        println!("  API keys:        {}", keyed.join(", "));
    }
    println!();

    if config.vault.endpoint.is_empty() {
        println!("Vault:             not configured");
    } else {
        let vault =
            rune::vault::VaultAdapter::new(&config.vault.endpoint, config.vault.token.clone());
        let status = vault.status().await;
        println!("Vault:             {}", config.vault.endpoint);
        println!(
            "  Reachable:       {}",
            if status.reachable { "yes" } else { "NO" }
        );
        println!("  Security mode:   {}", status.security_mode);
    }
    println!("enVector:          {}", config.envector.endpoint);
    if config.envector.index.is_empty() {
        println!("  Index:           (not set)");
    } else {
        println!("  Index:           {}", config.envector.index);
    }

    Ok(())
}

/// Print the effective configuration with secrets redacted.
pub fn config_show(config: &rune::config::RuneConfig) -> Result<()> {
    let mut value = serde_json::to_value(config)?;
    for path in [
        "/vault/token",
        "/envector/api_key",
        "/llm/anthropic_api_key",
        "/llm/openai_api_key",
        "/llm/google_api_key",
    ] {
        if let Some(field) = value.pointer_mut(path) {
            if field.as_str().is_some_and(|s| !s.is_empty()) {
                *field = serde_json::json!("<redacted>");
            }
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Download a file with a progress bar. Uses atomic write (tmp + rename).
async fn download_file(url: &str, dest: &PathBuf) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .expect("valid template")
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    let bytes = response.bytes().await.context("error reading response")?;
    pb.inc(bytes.len() as u64);
    file.write_all(&bytes).await.context("error writing file")?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}
