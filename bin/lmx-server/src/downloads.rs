//! HuggingFace-flavored [`RepoResolver`] wiring for [`lmx_fetch::DownloadManager`].

use std::path::PathBuf;

use lmx_fetch::RepoResolver;

/// Resolves `(repo_id, revision)` to a HuggingFace resolve-URL and a
/// destination path under the configured download directory. Production
/// HuggingFace repos are multi-file; this resolver targets a single
/// well-known weights file per repo, matching `DownloadManager`'s one-shot
/// streaming model rather than a full multi-file sync.
pub struct HfRepoResolver {
    dest_dir: PathBuf,
    filename: String,
}

impl HfRepoResolver {
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
            filename: "model.safetensors".to_string(),
        }
    }
}

impl RepoResolver for HfRepoResolver {
    fn resolve_url(&self, repo_id: &str, revision: &str) -> String {
        format!("https://huggingface.co/{repo_id}/resolve/{revision}/{}", self.filename)
    }

    fn resolve_dest(&self, repo_id: &str, revision: &str) -> PathBuf {
        let safe_repo_id = repo_id.replace('/', "__");
        self.dest_dir
            .join(format!("{safe_repo_id}__{revision}"))
            .join(&self.filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_url_targets_the_revision_scoped_resolve_path() {
        let resolver = HfRepoResolver::new("/tmp/downloads");
        let url = resolver.resolve_url("org/model", "main");
        assert_eq!(url, "https://huggingface.co/org/model/resolve/main/model.safetensors");
    }

    #[test]
    fn resolve_dest_escapes_the_repo_id_path_separator() {
        let resolver = HfRepoResolver::new("/tmp/downloads");
        let dest = resolver.resolve_dest("org/model", "main");
        assert_eq!(dest, PathBuf::from("/tmp/downloads/org__model__main/model.safetensors"));
    }
}
