/*!
Structs to hold configuration data and global variables.
*/
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::{
    auth::{self, Sessions},
    course::Course,
    notify::Mailer,
    store::{DbError, Store},
    user::{BaseUser, Role},
};

#[derive(Deserialize)]
struct ConfigFile {
    db_connect_string: Option<String>,
    admin_uname: Option<String>,
    admin_password: Option<String>,
    admin_email: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    templates_dir: Option<String>,
    static_dir: Option<String>,
    approval_email_delay: Option<u64>,
    rejection_email_delay: Option<u64>,
    mail_spool: Option<String>,
    mail_from: Option<String>,
    session_lifetime: Option<u64>,
}

#[derive(Debug)]
pub struct Cfg {
    pub db_connect_string: String,
    pub default_admin_uname: String,
    pub default_admin_password: String,
    pub default_admin_email: String,
    pub addr: SocketAddr,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
    /// Seconds between approving a request and sending the email.
    pub approval_email_delay: u64,
    /// Seconds between rejecting a request and sending the email.
    pub rejection_email_delay: u64,
    pub mail_spool: PathBuf,
    pub mail_from: String,
    /// Seconds a login session lasts.
    pub session_lifetime: u64,
}

impl std::default::Default for Cfg {
    fn default() -> Self {
        Self {
            db_connect_string: "host=localhost user=campus password='campus' dbname=campus".to_owned(),
            default_admin_uname: "root".to_owned(),
            default_admin_password: "toot".to_owned(),
            default_admin_email: "admin@campus.not.an.address".to_owned(),
            addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            templates_dir: PathBuf::from("templates"),
            static_dir: PathBuf::from("static"),
            approval_email_delay: 120,
            rejection_email_delay: 10,
            mail_spool: PathBuf::from("spool"),
            mail_from: "noreply@campus.not.an.address".to_owned(),
            session_lifetime: 8 * 60 * 60,
        }
    }
}

impl Cfg {
    pub fn from_toml(file_contents: &str) -> Result<Self, String> {
        let cf: ConfigFile = toml::from_str(file_contents)
            .map_err(|e| format!("Unable to deserialize config file: {}", &e))?;

        let mut c = Self::default();

        if let Some(s) = cf.db_connect_string {
            c.db_connect_string = s;
        }
        if let Some(s) = cf.admin_uname {
            c.default_admin_uname = s;
        }
        if let Some(s) = cf.admin_password {
            c.default_admin_password = s;
        }
        if let Some(s) = cf.admin_email {
            c.default_admin_email = s;
        }
        if let Some(s) = cf.host {
            c.addr.set_ip(
                s.parse().map_err(|e| format!(
                    "Error parsing {:?} as IP address: {}",
                    &s, &e
                ))?
            );
        }
        if let Some(n) = cf.port {
            c.addr.set_port(n);
        }
        if let Some(s) = cf.templates_dir {
            c.templates_dir = PathBuf::from(s);
        }
        if let Some(s) = cf.static_dir {
            c.static_dir = PathBuf::from(s);
        }
        if let Some(n) = cf.approval_email_delay {
            c.approval_email_delay = n;
        }
        if let Some(n) = cf.rejection_email_delay {
            c.rejection_email_delay = n;
        }
        if let Some(s) = cf.mail_spool {
            c.mail_spool = PathBuf::from(s);
        }
        if let Some(s) = cf.mail_from {
            c.mail_from = s;
        }
        if let Some(n) = cf.session_lifetime {
            if n == 0 {
                return Err("session_lifetime must be greater than zero.".to_owned());
            }
            c.session_lifetime = n;
        }

        Ok(c)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file {}: {}", path.display(), &e))?;
        Self::from_toml(&file_contents)
    }
}

/**
This guy will haul around some global variables and be passed in an
`axum::Extension` to the handlers who need him.
*/
#[derive(Debug)]
pub struct Glob {
    store: Store,
    pub sessions: RwLock<Sessions>,
    pub mailer: Arc<Mailer>,
    pub courses: HashMap<i64, Course>,
    pub approval_email_delay: Duration,
    pub rejection_email_delay: Duration,
    pub addr: SocketAddr,
}

impl Glob {
    /// Build global state from `cfg` without touching the database.
    pub fn from_cfg(cfg: &Cfg) -> Result<Glob, String> {
        let mailer = Mailer::new(cfg.mail_from.clone(), &cfg.mail_spool)?;

        let glob = Glob {
            store: Store::new(cfg.db_connect_string.clone()),
            sessions: RwLock::new(Sessions::new(Duration::from_secs(cfg.session_lifetime))),
            mailer: Arc::new(mailer),
            courses: HashMap::new(),
            approval_email_delay: Duration::from_secs(cfg.approval_email_delay),
            rejection_email_delay: Duration::from_secs(cfg.rejection_email_delay),
            addr: cfg.addr,
        };

        Ok(glob)
    }

    pub fn store(&self) -> &Store { &self.store }

    /// Reread the course list from the database.
    pub async fn refresh_courses(&mut self) -> Result<(), DbError> {
        log::trace!("Glob::refresh_courses() called.");
        self.courses = self.store.get_courses().await?;
        log::info!("Retrieved {} courses from data DB.", &self.courses.len());
        Ok(())
    }

    /// Courses in code order, for display.
    pub fn sorted_courses(&self) -> Vec<&Course> {
        let mut courses: Vec<&Course> = self.courses.values().collect();
        courses.sort_by(|a, b| a.code.cmp(&b.code));
        courses
    }
}

/// Ensure the configured default Admin can log in, inserting the account if
/// it's missing.
async fn ensure_default_admin(cfg: &Cfg, store: &Store) -> Result<(), String> {
    log::trace!("Checking existence of default Admin in data DB...");

    match store.get_credentials(&cfg.default_admin_uname).await {
        Err(e) => Err(format!(
            "Error attempting to check existence of default Admin ({}) in data DB: {}",
            &cfg.default_admin_uname, &e
        )),
        Ok(None) => {
            log::info!(
                "Default Admin ({}) doesn't exist in data DB; inserting.",
                &cfg.default_admin_uname
            );
            let admin = BaseUser {
                uname: cfg.default_admin_uname.clone(),
                role: Role::Admin,
                email: cfg.default_admin_email.clone(),
                first: String::new(),
                last: String::new(),
                active: true,
            }.into_admin();
            let hash = auth::spawn_hash(cfg.default_admin_password.clone()).await
                .map_err(|e| format!("Error hashing default Admin password: {}", &e))?;
            store.insert_user(&admin, &hash)
                .await
                .map_err(|e| format!("Error inserting default Admin into data DB: {}", &e))
        },
        Ok(Some((u, hash))) => {
            if u.role() != Role::Admin {
                log::warn!(
                    "Default Admin uname ({}) belongs to a {}.",
                    u.uname(), &u.role()
                );
            } else if !auth::spawn_verify(cfg.default_admin_password.clone(), hash).await {
                log::warn!("Default Admin ({}) not using default password.", u.uname());
            } else {
                log::trace!("Default Admin password check OK.");
            }
            Ok(())
        },
    }
}

/// Loads system configuration and ensures all appropriate database tables
/// exist.
///
/// Also assures existence of default admin.
pub async fn load_configuration<P: AsRef<Path>>(path: P) -> Result<(Cfg, Glob), String> {
    let cfg = Cfg::from_file(path.as_ref())?;
    log::info!("Configuration file read:\n{:#?}", &cfg);

    let mut glob = Glob::from_cfg(&cfg)?;

    log::trace!("Checking state of data DB...");
    if let Err(e) = glob.store().ensure_db_schema().await {
        let estr = format!("Unable to ensure state of data DB: {}", &e);
        return Err(estr);
    }
    log::trace!("...data DB okay.");

    ensure_default_admin(&cfg, glob.store()).await?;
    log::trace!("Default Admin OK in data DB.");

    glob.refresh_courses().await
        .map_err(|e| format!("Error retrieving courses from data DB: {}", &e))?;

    Ok((cfg, glob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    #[test]
    fn empty_file_gives_defaults() {
        ensure_logging();
        let c = Cfg::from_toml("").unwrap();
        let d = Cfg::default();
        assert_eq!(c.db_connect_string, d.db_connect_string);
        assert_eq!(c.addr, d.addr);
        assert_eq!(c.approval_email_delay, 120);
        assert_eq!(c.rejection_email_delay, 10);
    }

    #[test]
    fn file_overrides_defaults() {
        ensure_logging();
        let c = Cfg::from_toml(r#"
db_connect_string = "host=db user=u dbname=d"
admin_uname = "boss"
host = "127.0.0.1"
port = 9000
templates_dir = "/srv/campus/templates"
approval_email_delay = 30
mail_spool = "/var/spool/campus"
session_lifetime = 600
"#).unwrap();

        assert_eq!(c.db_connect_string, "host=db user=u dbname=d");
        assert_eq!(c.default_admin_uname, "boss");
        assert_eq!(c.default_admin_password, "toot");
        assert_eq!(c.addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(c.templates_dir, PathBuf::from("/srv/campus/templates"));
        assert_eq!(c.approval_email_delay, 30);
        assert_eq!(c.rejection_email_delay, 10);
        assert_eq!(c.mail_spool, PathBuf::from("/var/spool/campus"));
        assert_eq!(c.session_lifetime, 600);
    }

    #[test]
    fn bad_config_values() {
        ensure_logging();
        assert!(Cfg::from_toml("host = \"not an ip\"").is_err());
        assert!(Cfg::from_toml("port = \"eighty\"").is_err());
        assert!(Cfg::from_toml("session_lifetime = 0").is_err());
        assert!(Cfg::from_toml("this isn't toml").is_err());
        assert!(Cfg::from_file("no/such/campus.toml").is_err());
    }

    #[test]
    fn glob_from_defaults() {
        ensure_logging();
        let glob = Glob::from_cfg(&Cfg::default()).unwrap();
        assert_eq!(glob.approval_email_delay, Duration::from_secs(120));
        assert_eq!(glob.rejection_email_delay, Duration::from_secs(10));
        assert!(glob.sorted_courses().is_empty());
    }
}
