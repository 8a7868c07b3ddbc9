use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use once_cell::sync::Lazy;
use regex::{Captures, Regex, RegexBuilder};

pub const INSTALL_DIR_TOKEN: &str = "{InstallDir}";

static ENV_VAR_TOKEN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"%([A-Za-z_][A-Za-z0-9_()]*)%").ok());

/// Path-valued environment variables that `deflate` turns back into `%NAME%` tokens.
const PORTABLE_ENV_VARS: &[&str] = &[
    "TEMP",
    "TMP",
    "PUBLIC",
    "PROGRAMDATA",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "HOME",
    "USERPROFILE",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SpecialFolder {
    Desktop,
    MyDocuments,
    LocalAppData,
    AppData,
    CommonApplicationData,
    StartMenu,
    Programs,
    Startup,
    SavedGames,
    UserProfile,
}

impl SpecialFolder {
    /// Expansion order. Tokens are distinct so order only matters for readability of logs.
    pub const ALL: [SpecialFolder; 10] = [
        SpecialFolder::Desktop,
        SpecialFolder::MyDocuments,
        SpecialFolder::LocalAppData,
        SpecialFolder::AppData,
        SpecialFolder::CommonApplicationData,
        SpecialFolder::StartMenu,
        SpecialFolder::Programs,
        SpecialFolder::Startup,
        SpecialFolder::SavedGames,
        SpecialFolder::UserProfile,
    ];

    pub fn token(self) -> &'static str {
        match self {
            SpecialFolder::Desktop => "%Desktop%",
            SpecialFolder::MyDocuments => "%MyDocuments%",
            SpecialFolder::LocalAppData => "%LocalAppData%",
            SpecialFolder::AppData => "%AppData%",
            SpecialFolder::CommonApplicationData => "%CommonApplicationData%",
            SpecialFolder::StartMenu => "%StartMenu%",
            SpecialFolder::Programs => "%Programs%",
            SpecialFolder::Startup => "%Startup%",
            SpecialFolder::SavedGames => "%SavedGames%",
            SpecialFolder::UserProfile => "%UserProfile%",
        }
    }

    fn resolve(self) -> Option<PathBuf> {
        match self {
            SpecialFolder::Desktop => dirs::desktop_dir(),
            SpecialFolder::MyDocuments => dirs::document_dir(),
            SpecialFolder::LocalAppData => dirs::data_local_dir(),
            SpecialFolder::AppData => dirs::data_dir(),
            SpecialFolder::CommonApplicationData => {
                if cfg!(windows) {
                    std::env::var_os("ProgramData").map(PathBuf::from)
                } else {
                    None
                }
            }
            SpecialFolder::StartMenu => windows_only(
                dirs::data_dir().map(|dir| dir.join("Microsoft").join("Windows").join("Start Menu")),
            ),
            SpecialFolder::Programs => windows_only(dirs::data_dir().map(|dir| {
                dir.join("Microsoft")
                    .join("Windows")
                    .join("Start Menu")
                    .join("Programs")
            })),
            SpecialFolder::Startup => windows_only(dirs::data_dir().map(|dir| {
                dir.join("Microsoft")
                    .join("Windows")
                    .join("Start Menu")
                    .join("Programs")
                    .join("Startup")
            })),
            SpecialFolder::SavedGames => {
                windows_only(dirs::home_dir().map(|dir| dir.join("Saved Games")))
            }
            SpecialFolder::UserProfile => dirs::home_dir(),
        }
    }
}

fn windows_only(path: Option<PathBuf>) -> Option<PathBuf> {
    if cfg!(windows) {
        path
    } else {
        None
    }
}

#[derive(Clone, Debug)]
struct Substitution {
    token: String,
    value: String,
    token_pattern: Regex,
    value_pattern: Regex,
}

impl Substitution {
    fn new(token: String, value: String) -> Option<Self> {
        let value = trim_trailing_separators(&value);
        if value.is_empty() || value == "/" || value == "\\" {
            return None;
        }
        let token_pattern = RegexBuilder::new(&regex::escape(&token))
            .case_insensitive(true)
            .build()
            .ok()?;
        let value_pattern = RegexBuilder::new(&format!(r"{}([\\/]|$)", regex::escape(&value)))
            .case_insensitive(true)
            .build()
            .ok()?;
        Some(Self {
            token,
            value,
            token_pattern,
            value_pattern,
        })
    }
}

/// Maps absolute paths to and from portable tokens (`{InstallDir}`, `%MyDocuments%`, `%TEMP%`).
#[derive(Clone, Debug)]
pub struct PathCodec {
    folders: Vec<Substitution>,
    variables: Vec<Substitution>,
}

impl PathCodec {
    /// Resolves special folders and path variables from the current user session.
    pub fn system() -> Self {
        let folders = SpecialFolder::ALL
            .iter()
            .filter_map(|folder| folder.resolve().map(|path| (*folder, path)))
            .collect();
        let variables = PORTABLE_ENV_VARS
            .iter()
            .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
            .collect();
        Self::with_locations(folders, variables)
    }

    pub fn with_locations(
        folders: Vec<(SpecialFolder, PathBuf)>,
        variables: Vec<(String, String)>,
    ) -> Self {
        let folders = folders
            .into_iter()
            .filter_map(|(folder, path)| {
                Substitution::new(folder.token().to_string(), path.to_string_lossy().into_owned())
            })
            .collect();
        let variables = variables
            .into_iter()
            .filter_map(|(name, value)| Substitution::new(format!("%{name}%"), value))
            .collect();
        Self { folders, variables }
    }

    pub fn expand(&self, path: &str, install_dir: &Path) -> String {
        self.expand_with(path, install_dir, true)
    }

    pub fn expand_with(&self, path: &str, install_dir: &Path, normalize_separators: bool) -> String {
        let install_dir = install_dir.to_string_lossy();
        let mut expanded = replace_token(path, INSTALL_DIR_TOKEN, &install_dir);

        if normalize_separators {
            expanded = normalize_separators_for_host(&expanded);
        }

        for folder in &self.folders {
            expanded = folder
                .token_pattern
                .replace_all(&expanded, regex::NoExpand(&folder.value))
                .into_owned();
        }

        if let Some(pattern) = ENV_VAR_TOKEN.as_ref() {
            expanded = pattern
                .replace_all(&expanded, |caps: &Captures| {
                    let name = &caps[1];
                    self.variables
                        .iter()
                        .find(|variable| variable.token.eq_ignore_ascii_case(&caps[0]))
                        .map(|variable| variable.value.clone())
                        .or_else(|| std::env::var(name).ok())
                        .unwrap_or_else(|| caps[0].to_string())
                })
                .into_owned();
        }

        trim_trailing_separators(&expanded)
    }

    /// Inverse of [`PathCodec::expand`]. Trailing separators are dropped, as `expand` drops them.
    pub fn deflate(&self, path: &str, install_dir: &Path) -> String {
        let install_dir = trim_trailing_separators(&install_dir.to_string_lossy());
        let mut deflated = trim_trailing_separators(path);

        if !install_dir.trim().is_empty() && starts_with_dir(&deflated, &install_dir) {
            deflated = format!("{}{}", INSTALL_DIR_TOKEN, &deflated[install_dir.len()..]);
        }

        let mut candidates: Vec<&Substitution> =
            self.folders.iter().chain(self.variables.iter()).collect();
        candidates.sort_by(|a, b| b.value.len().cmp(&a.value.len()));

        for candidate in candidates {
            let replacement = format!("{}${{1}}", candidate.token);
            deflated = candidate
                .value_pattern
                .replace_all(&deflated, replacement.as_str())
                .into_owned();
        }

        deflated
    }
}

fn replace_token(haystack: &str, token: &str, value: &str) -> String {
    match RegexBuilder::new(&regex::escape(token))
        .case_insensitive(true)
        .build()
    {
        Ok(pattern) => pattern
            .replace_all(haystack, regex::NoExpand(value))
            .into_owned(),
        Err(_) => haystack.replace(token, value),
    }
}

fn starts_with_dir(path: &str, dir: &str) -> bool {
    let Some(head) = path.get(..dir.len()) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(dir) {
        return false;
    }
    matches!(path[dir.len()..].chars().next(), None | Some('/') | Some('\\'))
}

pub fn normalize_separators_for_host(path: &str) -> String {
    if MAIN_SEPARATOR == '\\' {
        path.replace('/', "\\")
    } else {
        path.replace('\\', "/")
    }
}

fn trim_trailing_separators(path: &str) -> String {
    let trimmed = path.trim_end_matches(['/', '\\']);
    if trimmed.is_empty() && !path.is_empty() {
        MAIN_SEPARATOR.to_string()
    } else {
        trimmed.to_string()
    }
}

const ROOT_DIR_VAR: &str = "OTOSHI_ROOT_DIR";
const PORTABLE_MARKER: &str = "portable.config.json";

fn ensure_dir(path: &Path) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    std::fs::create_dir_all(path).ok()?;
    Some(path.to_path_buf())
}

/// Launcher data root: `OTOSHI_ROOT_DIR`, a portable install beside the
/// executable, the user data directory, then the current directory.
pub fn resolve_root_dir() -> PathBuf {
    root_dir_from(std::env::var(ROOT_DIR_VAR).ok().as_deref())
}

fn root_dir_from(override_dir: Option<&str>) -> PathBuf {
    if let Some(dir) = override_dir
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .and_then(|value| ensure_dir(Path::new(value)))
    {
        return dir;
    }

    let portable = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .filter(|dir| dir.join(PORTABLE_MARKER).exists());
    if let Some(dir) = portable {
        return dir;
    }

    dirs::data_dir()
        .and_then(|data| ensure_dir(&data.join("otoshi")))
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn resolve_log_dir() -> PathBuf {
    logs_under(&resolve_root_dir())
}

fn logs_under(root: &Path) -> PathBuf {
    let logs = root.join("logs");
    ensure_dir(&logs).unwrap_or(logs)
}
