/*!
Accounts, role profiles, and pending registration requests.
*/
use serde::Serialize;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    Admin,
    Faculty,
    Student,
}

impl Role {
    /// Numeric user type: 1 for Admin, 2 for Faculty, 3 for Student.
    pub fn code(&self) -> i16 {
        match self {
            Role::Admin   => 1,
            Role::Faculty => 2,
            Role::Student => 3,
        }
    }

    pub fn from_code(n: i16) -> Option<Role> {
        match n {
            1 => Some(Role::Admin),
            2 => Some(Role::Faculty),
            3 => Some(Role::Student),
            _ => None,
        }
    }

    /// Path of the landing page for users of this role.
    pub fn dashboard(&self) -> &'static str {
        match self {
            Role::Admin   => "/admin",
            Role::Faculty => "/faculty",
            Role::Student => "/student",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let token = match self {
            Role::Admin   => "Admin",
            Role::Faculty => "Faculty",
            Role::Student => "Student",
        };

        write!(f, "{}", token)
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Admin"   => Ok(Role::Admin),
            "Faculty" => Ok(Role::Faculty),
            "Student" => Ok(Role::Student),
            _ => Err(format!("{:?} is not a valid Role.", s)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BaseUser {
    pub uname: String,
    pub role: Role,
    pub email: String,
    pub first: String,
    pub last: String,
    pub active: bool,
}

impl BaseUser {
    pub fn into_admin(self) -> User { User::Admin(self) }
    pub fn into_faculty(self, department: Option<String>) -> User {
        User::Faculty(Faculty { base: self, department })
    }
    pub fn into_student(self, course: Option<i64>) -> User {
        User::Student(Student { base: self, course })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Faculty {
    pub base: BaseUser,
    pub department: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Student {
    pub base: BaseUser,
    /// `id` of the course the student is enrolled in.
    pub course: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum User {
    Admin(BaseUser),
    Faculty(Faculty),
    Student(Student),
}

impl User {
    pub fn base(&self) -> &BaseUser {
        match self {
            User::Admin(base) => base,
            User::Faculty(f) => &f.base,
            User::Student(s) => &s.base,
        }
    }

    pub fn uname(&self) -> &str { &self.base().uname }

    pub fn email(&self) -> &str { &self.base().email }

    pub fn is_active(&self) -> bool { self.base().active }

    pub fn role(&self) -> Role {
        match self {
            User::Admin(_) => Role::Admin,
            User::Faculty(_) => Role::Faculty,
            User::Student(_) => Role::Student,
        }
    }

    /// "First Last", falling back to the uname when both are blank.
    pub fn full_name(&self) -> String {
        let base = self.base();
        let name = format!("{} {}", base.first.trim(), base.last.trim());
        match name.trim() {
            "" => base.uname.clone(),
            x => x.to_owned(),
        }
    }
}

/// A sign-up awaiting an Admin's decision.
///
/// `hash` is already hashed; approval copies it into the new account as-is.
#[derive(Clone, Debug, PartialEq)]
pub struct RegistrationRequest {
    pub id: i64,
    pub uname: String,
    pub hash: String,
    pub email: String,
    pub first: String,
    pub last: String,
    pub role: Role,
    pub created: OffsetDateTime,
}

impl RegistrationRequest {
    /// The account an approval of this request creates. Approved accounts
    /// are active from the start.
    pub fn into_base_user(self) -> (BaseUser, String) {
        let base = BaseUser {
            uname: self.uname,
            role: self.role,
            email: self.email,
            first: self.first,
            last: self.last,
            active: true,
        };
        (base, self.hash)
    }
}
