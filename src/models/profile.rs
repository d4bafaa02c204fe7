use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: i64,
    pub name: String,
    pub app_id: String,
    pub install_directory: PathBuf,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub beta: Option<String>,
    #[serde(default, skip_serializing)]
    pub beta_password: Option<String>,
    #[serde(default)]
    pub validate: bool,
    #[serde(default)]
    pub extra_arguments: String,
}

impl Profile {
    pub fn steamapps_dir(&self) -> PathBuf {
        self.install_directory.join("steamapps")
    }

    /// Secrets that must be masked whenever a command line is logged.
    pub fn secrets(&self) -> Vec<&str> {
        let mut out = Vec::new();
        if !self.password.is_empty() {
            out.push(self.password.as_str());
        }
        if let Some(pw) = self.beta_password.as_deref().filter(|p| !p.is_empty()) {
            out.push(pw);
        }
        out
    }
}

impl fmt::Debug for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Profile")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("app_id", &self.app_id)
            .field("install_directory", &self.install_directory)
            .field("anonymous", &self.anonymous)
            .field("username", &self.username)
            .field("beta", &self.beta)
            .field("validate", &self.validate)
            .field("extra_arguments", &self.extra_arguments)
            .finish_non_exhaustive()
    }
}
