//! 按书库区分的插件设置（Preferences Facade）。
//!
//! 查找顺序：本插件命名空间 → 前身插件（FanFictionDownLoader）命名空间 → 内置默认值。
//! 解析结果按书库 id 做单槽缓存，书库切换后下一次访问自动重新解析。

use std::sync::OnceLock;

use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::download::models::CollisionPolicy;
use crate::third_party::host::{LibraryDb, SharedLibrary, StoreError};

pub const PREFS_NAMESPACE: &str = "FanFicFarePlugin";
/// Settings of the predecessor plugin, read when this plugin has none yet.
pub const FFDL_PREFS_NAMESPACE: &str = "FanFictionDownLoaderPlugin";
pub const PREFS_KEY_SETTINGS: &str = "settings";

pub type Settings = Map<String, Value>;

const PLUGIN_EXAMPLE_INI: &str = include_str!("../../resources/plugin-example.ini");

// 界面显示用字符串与保存到设置里的字符串分开，这样切换界面语言不影响已保存的设置。
pub const YES: &str = "Yes, Always";
pub const SAVE_YES: &str = "Yes";
pub const YES_IF_IMG: &str = "Yes, if EPUB has a cover image";
pub const SAVE_YES_IF_IMG: &str = "Yes, if img";
pub const YES_UNLESS_IMG: &str = "Yes, unless FanFicFare found a cover image";
pub const SAVE_YES_UNLESS_IMG: &str = "Yes, unless img";
pub const NO: &str = "No";
pub const SAVE_NO: &str = "No";

pub const UPDATECALCOVER_ORDER: [&str; 3] = [YES, YES_IF_IMG, NO];
pub const GENCALCOVER_ORDER: [&str; 3] = [YES, YES_UNLESS_IMG, NO];

/// Translates a cover option between its display and saved forms (both ways).
pub fn calcover_save_option(value: &str) -> Option<&'static str> {
    Some(match value {
        YES => SAVE_YES,
        SAVE_YES => YES,
        YES_IF_IMG => SAVE_YES_IF_IMG,
        SAVE_YES_IF_IMG => YES_IF_IMG,
        YES_UNLESS_IMG => SAVE_YES_UNLESS_IMG,
        SAVE_YES_UNLESS_IMG => YES_UNLESS_IMG,
        // "No" is both the display and the saved string.
        NO => SAVE_NO,
        _ => return None,
    })
}

#[derive(Debug, Error)]
pub enum PrefsError {
    #[error("no default preference for key {0:?}")]
    UnknownKey(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// 所有书库共用的内置默认值。
pub fn default_prefs() -> &'static Settings {
    static DEFAULTS: OnceLock<Settings> = OnceLock::new();
    DEFAULTS.get_or_init(build_default_prefs)
}

fn build_default_prefs() -> Settings {
    let value = json!({
        "personal.ini": PLUGIN_EXAMPLE_INI,
        "rejecturls": "",
        "rejectreasons": "Sucked\nBoring\nDup from another site",
        "reject_always": false,

        "updatemeta": true,
        "updateepubcover": false,
        "keeptags": false,
        "suppressauthorsort": false,
        "suppresstitlesort": false,
        "mark": false,
        "showmarked": false,
        "autoconvert": false,
        "urlsfromclip": true,
        "updatedefault": true,
        "fileform": "epub",
        "collision": CollisionPolicy::Update.saved_name(),
        "deleteotherforms": false,
        "adddialogstaysontop": false,
        "lookforurlinhtml": false,
        "checkforseriesurlid": true,
        "checkforurlchange": true,
        "injectseries": false,
        "smarten_punctuation": false,
        "show_est_time": false,

        "send_lists": "",
        "read_lists": "",
        "addtolists": false,
        "addtoreadlists": false,
        "addtolistsonread": false,

        "updatecalcover": null,
        "gencalcover": SAVE_YES,
        "updatecover": false,
        "calibre_gen_cover": false,
        "plugin_gen_cover": true,
        "gcnewonly": false,
        "gc_site_settings": {},
        "allow_gc_from_ini": true,
        "gc_polish_cover": false,

        "countpagesstats": [],
        "wordcountmissing": false,

        "errorcol": "",
        "savemetacol": "",
        "custom_cols": {},
        "custom_cols_newonly": {},
        "allow_custcol_from_ini": true,

        "std_cols_newonly": {},

        "imapserver": "",
        "imapuser": "",
        "imappass": "",
        "imapsessionpass": false,
        "imapfolder": "INBOX",
        "imapmarkread": true,
        "auto_reject_from_email": false,
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub fn set_library_config(settings: &Settings, db: &dyn LibraryDb) -> Result<(), PrefsError> {
    db.prefs().set_namespaced(
        PREFS_NAMESPACE,
        PREFS_KEY_SETTINGS,
        Value::Object(settings.clone()),
    )?;
    Ok(())
}

pub fn get_library_config(db: &dyn LibraryDb) -> Settings {
    let store = db.prefs();
    if let Some(Value::Object(settings)) = store.get_namespaced(PREFS_NAMESPACE, PREFS_KEY_SETTINGS)
    {
        return settings;
    }

    info!(target: "prefs", "Attempting to read settings from predecessor--FFDL");
    if let Some(Value::Object(settings)) =
        store.get_namespaced(FFDL_PREFS_NAMESPACE, PREFS_KEY_SETTINGS)
    {
        return settings;
    }

    info!(target: "prefs", "Using default settings");
    default_prefs().clone()
}

enum DbSource {
    /// CLI 调用时显式传入的书库。
    Passed(SharedLibrary),
    /// GUI 中的"当前书库"，每次访问都重新获取以便发现切换。
    Current(Box<dyn Fn() -> SharedLibrary + Send + Sync>),
}

struct PrefsCache {
    library_id: String,
    settings: Settings,
}

pub struct PrefsFacade {
    source: DbSource,
    cache: Option<PrefsCache>,
}

impl PrefsFacade {
    pub fn with_library(db: SharedLibrary) -> Self {
        Self {
            source: DbSource::Passed(db),
            cache: None,
        }
    }

    pub fn with_current<F>(current_db: F) -> Self
    where
        F: Fn() -> SharedLibrary + Send + Sync + 'static,
    {
        Self {
            source: DbSource::Current(Box::new(current_db)),
            cache: None,
        }
    }

    fn db(&self) -> SharedLibrary {
        match &self.source {
            DbSource::Passed(db) => db.clone(),
            DbSource::Current(current) => current(),
        }
    }

    /// Library id the cached settings were resolved for, if any.
    pub fn cached_library_id(&self) -> Option<&str> {
        self.cache.as_ref().map(|c| c.library_id.as_str())
    }

    fn current_prefs(&mut self) -> &mut Settings {
        let db = self.db();
        let library_id = db.library_id();

        let fresh = matches!(&self.cache, Some(c) if c.library_id == library_id);
        if !fresh {
            debug!(target: "prefs", library_id = %library_id, "resolve library settings");
            self.cache = None;
        }
        let cache = self.cache.get_or_insert_with(|| PrefsCache {
            settings: get_library_config(db.as_ref()),
            library_id,
        });
        &mut cache.settings
    }

    /// 未保存在书库设置中的键回落到内置默认值；默认值里也没有则报错。
    pub fn get(&mut self, key: &str) -> Result<Value, PrefsError> {
        if let Some(value) = self.current_prefs().get(key) {
            return Ok(value.clone());
        }
        default_prefs()
            .get(key)
            .cloned()
            .ok_or_else(|| PrefsError::UnknownKey(key.to_string()))
    }

    pub fn get_bool(&mut self, key: &str) -> Result<bool, PrefsError> {
        Ok(self.get(key)?.as_bool().unwrap_or(false))
    }

    pub fn get_string(&mut self, key: &str) -> Result<String, PrefsError> {
        Ok(match self.get(key)? {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }

    /// Changes the resolved settings only; `save_to_db` persists them.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) {
        self.current_prefs().insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) {
        self.current_prefs().remove(key);
    }

    /// Effective settings: defaults overlaid with the library's values.
    pub fn snapshot(&mut self) -> Settings {
        let mut merged = default_prefs().clone();
        for (k, v) in self.current_prefs().iter() {
            merged.insert(k.clone(), v.clone());
        }
        merged
    }

    pub fn save_to_db(&mut self) -> Result<(), PrefsError> {
        let db = self.db();
        let settings = self.current_prefs().clone();
        set_library_config(&settings, db.as_ref())
    }
}
