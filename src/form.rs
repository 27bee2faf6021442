/*!
HTML form payloads and their validation.

Every field deserializes with a default so that a form with missing fields
still reaches validation and can be re-rendered with inline errors, rather
than being bounced by the extractor.
*/
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::user::Role;

pub const UNAME_MAX_LENGTH: usize = 150;
pub const PASSWORD_MIN_LENGTH: usize = 8;
/// Hashing cost grows with password length; anything longer is refused
/// before it gets that far.
pub const PASSWORD_MAX_LENGTH: usize = 4096;
const UNAME_EXTRA_CHARS: &str = "@.+-_";

/// Per-field and whole-form error messages.
#[derive(Debug, Default, Serialize)]
pub struct FormErrors {
    pub fields: BTreeMap<String, Vec<String>>,
    pub form: Vec<String>,
}

impl FormErrors {
    pub fn add<S: Into<String>>(&mut self, field: &str, msg: S) {
        self.fields.entry(field.to_owned())
            .or_insert_with(Vec::new)
            .push(msg.into());
    }

    pub fn add_form<S: Into<String>>(&mut self, msg: S) {
        self.form.push(msg.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.form.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    fn into_result<T>(self, t: T) -> Result<T, FormErrors> {
        if self.is_empty() { Ok(t) } else { Err(self) }
    }
}

fn check_uname(uname: &str, errs: &mut FormErrors) {
    if uname.is_empty() {
        errs.add("uname", "This field is required.");
    } else if uname.chars().count() > UNAME_MAX_LENGTH {
        errs.add("uname", format!(
            "Ensure this value has at most {} characters.", UNAME_MAX_LENGTH
        ));
    } else if !uname.chars().all(|c|
        c.is_alphanumeric() || UNAME_EXTRA_CHARS.contains(c)
    ) {
        errs.add(
            "uname",
            "Enter a valid username. This value may contain only letters, numbers, and @/./+/-/_ characters."
        );
    }
}

fn check_email(email: &str, errs: &mut FormErrors) {
    if email.is_empty() {
        errs.add("email", "This field is required.");
        return;
    }

    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
                && domain.split('.').all(|label|
                    !label.is_empty()
                        && !label.starts_with('-')
                        && !label.ends_with('-')
                )
        },
        None => false,
    };
    if !valid {
        errs.add("email", "Enter a valid email address.");
    }
}

fn too_long_password(password: &str) -> bool {
    password.chars().count() > PASSWORD_MAX_LENGTH
}

fn check_password(password: &str, password2: &str, errs: &mut FormErrors) {
    if password.is_empty() {
        errs.add("password", "This field is required.");
    } else if password.chars().count() < PASSWORD_MIN_LENGTH {
        errs.add("password", format!(
            "This password is too short. It must contain at least {} characters.",
            PASSWORD_MIN_LENGTH
        ));
    } else if too_long_password(password) {
        errs.add("password", format!(
            "Ensure this value has at most {} characters.", PASSWORD_MAX_LENGTH
        ));
    }
    if password != password2 {
        errs.add("password2", "The two password fields didn't match.");
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoginForm {
    #[serde(default)]
    pub uname: String,
    #[serde(default, skip_serializing)]
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), FormErrors> {
        let mut errs = FormErrors::default();
        if self.uname.trim().is_empty() {
            errs.add("uname", "This field is required.");
        }
        if self.password.is_empty() {
            errs.add("password", "This field is required.");
        } else if too_long_password(&self.password) {
            errs.add("password", format!(
                "Ensure this value has at most {} characters.", PASSWORD_MAX_LENGTH
            ));
        }
        errs.into_result(())
    }
}

/// Fields common to every account-creating form, once validated.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub uname: String,
    pub email: String,
    pub first: String,
    pub last: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AccountFields {
    #[serde(default)]
    pub uname: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    #[serde(default, skip_serializing)]
    pub password2: String,
}

impl AccountFields {
    fn check(&self, errs: &mut FormErrors) -> NewAccount {
        let acct = NewAccount {
            uname: self.uname.trim().to_owned(),
            email: self.email.trim().to_owned(),
            first: self.first_name.trim().to_owned(),
            last: self.last_name.trim().to_owned(),
            password: self.password.clone(),
        };
        check_uname(&acct.uname, errs);
        check_email(&acct.email, errs);
        check_password(&self.password, &self.password2, errs);
        acct
    }
}

/// Public sign-up. Only Faculty and Student accounts may be requested.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RegistrationForm {
    #[serde(flatten)]
    pub account: AccountFields,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub account: NewAccount,
    pub role: Role,
}

/// Accepts either the numeric user type or the role's name.
fn parse_requestable_role(s: &str) -> Option<Role> {
    let s = s.trim();
    let role = match s.parse::<i16>() {
        Ok(n) => Role::from_code(n)?,
        Err(_) => s.parse::<Role>().ok()?,
    };
    match role {
        Role::Admin => None,
        r => Some(r),
    }
}

impl RegistrationForm {
    pub fn validate(&self) -> Result<Registration, FormErrors> {
        let mut errs = FormErrors::default();
        let account = self.account.check(&mut errs);
        let role = parse_requestable_role(&self.role);
        if role.is_none() {
            errs.add("role", "Select a valid choice.");
        }
        match role {
            Some(role) => errs.into_result(Registration { account, role }),
            None => Err(errs),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StudentForm {
    #[serde(flatten)]
    pub account: AccountFields,
    #[serde(default)]
    pub course: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewStudent {
    pub account: NewAccount,
    pub course: i64,
}

impl StudentForm {
    /// `course_exists` reports whether a course `id` is known.
    pub fn validate<F>(&self, course_exists: F) -> Result<NewStudent, FormErrors>
    where
        F: Fn(i64) -> bool
    {
        let mut errs = FormErrors::default();
        let account = self.account.check(&mut errs);

        let course = match self.course.trim() {
            "" => {
                errs.add("course", "This field is required.");
                None
            },
            s => match s.parse::<i64>() {
                Ok(id) if course_exists(id) => Some(id),
                _ => {
                    errs.add("course", "Select a valid choice.");
                    None
                },
            },
        };

        match course {
            Some(course) => errs.into_result(NewStudent { account, course }),
            None => Err(errs),
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FacultyForm {
    #[serde(flatten)]
    pub account: AccountFields,
    #[serde(default)]
    pub department: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewFaculty {
    pub account: NewAccount,
    pub department: Option<String>,
}

impl FacultyForm {
    pub fn validate(&self) -> Result<NewFaculty, FormErrors> {
        let mut errs = FormErrors::default();
        let account = self.account.check(&mut errs);
        let department = match self.department.trim() {
            "" => None,
            x => Some(x.to_owned()),
        };
        errs.into_result(NewFaculty { account, department })
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CourseForm {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
}

impl CourseForm {
    /// Returns the trimmed `(code, name)`.
    pub fn validate(&self) -> Result<(String, String), FormErrors> {
        let mut errs = FormErrors::default();
        let code = self.code.trim();
        let name = self.name.trim();
        if code.is_empty() {
            errs.add("code", "This field is required.");
        } else if code.chars().any(char::is_whitespace) {
            errs.add("code", "Course codes may not contain spaces.");
        }
        if name.is_empty() {
            errs.add("name", "This field is required.");
        }
        errs.into_result((code.to_owned(), name.to_owned()))
    }
}
