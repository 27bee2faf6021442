/*!
Approval and rejection emails.

Emails are composed from the templates below and dropped into a spool
directory for the mail transfer agent to pick up. Sending is scheduled
fire-and-forget: the handler that schedules a notice never learns whether it
went out, and failures are only logged.
*/
use std::path::{Path, PathBuf};
use std::time::Duration;

use handlebars::Handlebars;
use serde_json::json;
use time::{OffsetDateTime, format_description::well_known::Rfc2822};
use tokio::task::JoinHandle;

static APPROVAL_SUBJECT: &str = "Your Registration has been Approved!";
static REJECTION_SUBJECT: &str = "Your Registration Status";

static APPROVAL_BODY: &str = "Hello {{uname}},

Your registration request has been approved. You can now log in with the
username and password you registered with.

Welcome aboard!
";

static REJECTION_BODY: &str = "Hello {{uname}},

We're sorry to tell you that your registration request has been declined.
If you believe this is a mistake, please contact the campus office.
";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NoticeKind {
    Approval,
    Rejection,
}

impl NoticeKind {
    fn template_name(&self) -> &'static str {
        match self {
            NoticeKind::Approval => "approval",
            NoticeKind::Rejection => "rejection",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            NoticeKind::Approval => APPROVAL_SUBJECT,
            NoticeKind::Rejection => REJECTION_SUBJECT,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub uname: String,
    pub email: String,
}

impl Notice {
    pub fn approval(uname: &str, email: &str) -> Notice {
        Notice { kind: NoticeKind::Approval, uname: uname.to_owned(), email: email.to_owned() }
    }

    pub fn rejection(uname: &str, email: &str) -> Notice {
        Notice { kind: NoticeKind::Rejection, uname: uname.to_owned(), email: email.to_owned() }
    }
}

#[derive(Debug, PartialEq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl Email {
    /// RFC 822 style text of the message, dated `date`.
    pub fn to_message(&self, date: OffsetDateTime) -> Result<String, String> {
        let date = date.format(&Rfc2822)
            .map_err(|e| format!("Unable to format date: {}", &e))?;
        Ok(format!(
            "From: {}\r\nTo: {}\r\nSubject: {}\r\nDate: {}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{}",
            &self.from, &self.to, &self.subject, &date,
            self.body.replace('\n', "\r\n")
        ))
    }
}

#[derive(Debug)]
pub struct Mailer {
    from: String,
    spool: PathBuf,
    templates: Handlebars<'static>,
}

impl Mailer {
    pub fn new<P: AsRef<Path>>(from: String, spool: P) -> Result<Self, String> {
        let spool = spool.as_ref().to_path_buf();
        log::trace!("Mailer::new( {:?}, {} ) called.", &from, spool.display());

        let mut templates = Handlebars::new();
        templates.set_strict_mode(true);
        // Plain text; don't HTML-escape usernames.
        templates.register_escape_fn(handlebars::no_escape);
        for (name, body) in [
            (NoticeKind::Approval.template_name(), APPROVAL_BODY),
            (NoticeKind::Rejection.template_name(), REJECTION_BODY),
        ] {
            templates.register_template_string(name, body)
                .map_err(|e| format!("Error registering email template {:?}: {}", name, &e))?;
        }

        Ok(Self { from, spool, templates })
    }

    pub fn compose(&self, notice: &Notice) -> Result<Email, String> {
        let data = json!({ "uname": &notice.uname });
        let body = self.templates.render(notice.kind.template_name(), &data)
            .map_err(|e| format!(
                "Error rendering {:?} email for {:?}: {}",
                &notice.kind, &notice.uname, &e
            ))?;

        Ok(Email {
            from: self.from.clone(),
            to: notice.email.clone(),
            subject: notice.kind.subject().to_owned(),
            body,
        })
    }

    /// Compose `notice` and write it to the spool. Returns the path written.
    pub async fn deliver(&self, notice: &Notice) -> Result<PathBuf, String> {
        log::trace!("Mailer::deliver( {:?} ) called.", notice);

        let email = self.compose(notice)?;
        let now = OffsetDateTime::now_utc();
        let message = email.to_message(now)?;

        tokio::fs::create_dir_all(&self.spool).await
            .map_err(|e| format!(
                "Unable to create mail spool {}: {}", self.spool.display(), &e
            ))?;

        let fname = format!(
            "{}-{}-{}.eml",
            now.unix_timestamp_nanos(),
            notice.kind.template_name(),
            &notice.uname
        );
        let path = self.spool.join(fname);
        tokio::fs::write(&path, message.as_bytes()).await
            .map_err(|e| format!("Unable to write {}: {}", path.display(), &e))?;

        log::info!(
            "Spooled {:?} email for {:?} <{}> at {}.",
            &notice.kind, &notice.uname, &notice.email, path.display()
        );
        Ok(path)
    }

    /// Deliver `notice` after `delay` on a detached task.
    pub fn schedule(
        self: &std::sync::Arc<Self>,
        notice: Notice,
        delay: Duration
    ) -> JoinHandle<()> {
        log::trace!("Mailer::schedule( {:?}, {:?} ) called.", &notice, &delay);

        let mailer = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = mailer.deliver(&notice).await {
                log::error!("Failed sending {:?} email: {}", &notice.kind, &e);
            }
        })
    }
}
