// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolve the config path: first CLI argument, then `NFS41_CONFIG`,
/// then `config.yaml` next to the working directory.
pub fn config_path_from_env() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("NFS41_CONFIG").ok())
        .unwrap_or_else(|| "config.yaml".to_string())
}

pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    let canon = abs
        .canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))?;

    Ok(canon)
}
