/*!
`Store` methods for accounts and their role profiles.

Faculty accounts have a row in `faculty`, Student accounts a row in
`students`; Admin accounts have no profile row.
*/
use tokio_postgres::{Row, Transaction};

use super::{Store, DbError};
use crate::user::*;

static USER_QUERY: &str = "
    SELECT users.uname, users.role, users.hash, users.email,
           users.first_name, users.last_name, users.active,
           faculty.uname AS faculty_uname, faculty.department,
           students.uname AS student_uname, students.course
        FROM users
        LEFT JOIN faculty ON faculty.uname = users.uname
        LEFT JOIN students ON students.uname = users.uname
        WHERE users.uname = $1";

fn user_from_row(row: &Row) -> Result<User, DbError> {
    log::trace!("user_from_row( {:?} ) called", row);

    let role_str: &str = row.try_get("role")?;
    let base = BaseUser {
        uname: row.try_get("uname")?,
        role: role_str.parse()?,
        email: row.try_get("email")?,
        first: row.try_get("first_name")?,
        last: row.try_get("last_name")?,
        active: row.try_get("active")?,
    };

    // The profile key is NULL when the LEFT JOIN found no profile row,
    // which would otherwise look just like an empty profile.
    let profile_key: Option<String> = match base.role {
        Role::Admin => None,
        Role::Faculty => row.try_get("faculty_uname")?,
        Role::Student => row.try_get("student_uname")?,
    };
    if base.role != Role::Admin && profile_key.is_none() {
        return Err(DbError(format!(
            "{} {:?} has no profile row.", &base.role, &base.uname
        )));
    }

    let u = match base.role {
        Role::Admin => base.into_admin(),
        Role::Faculty => {
            let department: Option<String> = row.try_get("department")?;
            base.into_faculty(department)
        },
        Role::Student => {
            let course: Option<i64> = row.try_get("course")?;
            base.into_student(course)
        },
    };

    Ok(u)
}

/// Return the role of extant user `uname`, if there is one.
///
/// Used when inserting new users, mainly to ensure good error messaging
/// when a username is already in use.
pub(super) async fn check_existing_user_role(
    t: &Transaction<'_>,
    uname: &str,
) -> Result<Option<Role>, DbError> {
    log::trace!("check_existing_user_role( T, {:?} ) called.", uname);

    match t.query_opt(
        "SELECT role FROM users WHERE uname = $1",
        &[&uname]
    ).await.map_err(|e|
        DbError::from(e).annotate("Error querying for preexisting uname")
    )? {
        None => Ok(None),
        Some(row) => {
            let role_str: &str = row.try_get("role")
                .map_err(|e|
                    DbError::from(e).annotate("Error getting role of preexisting uname")
                )?;
            let role: Role = role_str.parse()
                .map_err(|e| DbError(e).annotate("Error parsing role of preexisting uname"))?;
            Ok(Some(role))
        },
    }
}

/// Insert `u` and its profile row, if it has one.
///
/// Errors if the uname is already taken.
pub(super) async fn insert_user_with(
    t: &Transaction<'_>,
    u: &User,
    hash: &str,
) -> Result<(), DbError> {
    log::trace!("insert_user_with( T, {:?}, [ hash ] ) called.", u.uname());

    if let Some(role) = check_existing_user_role(t, u.uname()).await? {
        return Err(DbError(format!(
            "User name {} already exists with role {}.",
            u.uname(), &role
        )));
    }

    let base = u.base();
    t.execute(
        "INSERT INTO users (uname, role, hash, email, first_name, last_name, active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)",
        &[
            &base.uname,
            &u.role().to_string(),
            &hash,
            &base.email,
            &base.first,
            &base.last,
            &base.active,
        ]
    ).await?;

    match u {
        User::Admin(_) => {},
        User::Faculty(f) => {
            t.execute(
                "INSERT INTO faculty (uname, department) VALUES ($1, $2)",
                &[&base.uname, &f.department]
            ).await?;
        },
        User::Student(s) => {
            t.execute(
                "INSERT INTO students (uname, course) VALUES ($1, $2)",
                &[&base.uname, &s.course]
            ).await?;
        },
    }

    Ok(())
}

impl Store {
    /// Insert a new account, with its role profile, in one transaction.
    pub async fn insert_user(&self, u: &User, hash: &str) -> Result<(), DbError> {
        log::trace!("Store::insert_user( {:?}, [ hash ] ) called.", u.uname());

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        insert_user_with(&t, u, hash).await?;

        t.commit().await?;
        log::info!("Inserted {} {:?} ({}).", u.role(), u.uname(), u.email());
        Ok(())
    }

    pub async fn get_user_by_uname(&self, uname: &str) -> Result<Option<User>, DbError> {
        log::trace!("Store::get_user_by_uname( {:?} ) called.", uname);

        let client = self.connect().await?;
        match client.query_opt(USER_QUERY, &[&uname]).await? {
            None => Ok(None),
            Some(row) => Ok(Some(user_from_row(&row)?)),
        }
    }

    /// The account and its password hash, for checking a login.
    pub async fn get_credentials(
        &self,
        uname: &str
    ) -> Result<Option<(User, String)>, DbError> {
        log::trace!("Store::get_credentials( {:?} ) called.", uname);

        let client = self.connect().await?;
        match client.query_opt(USER_QUERY, &[&uname]).await? {
            None => Ok(None),
            Some(row) => {
                let u = user_from_row(&row)?;
                let hash: String = row.try_get("hash")?;
                Ok(Some((u, hash)))
            },
        }
    }

    /// Number of active accounts with the given role.
    pub async fn count_active(&self, role: Role) -> Result<i64, DbError> {
        log::trace!("Store::count_active( {} ) called.", &role);

        let client = self.connect().await?;
        let row = client.query_one(
            "SELECT COUNT(*) FROM users WHERE role = $1 AND active",
            &[&role.to_string()]
        ).await?;
        Ok(row.try_get(0)?)
    }

    /// Whether `uname` belongs to an account or a pending registration.
    pub async fn uname_in_use(&self, uname: &str) -> Result<bool, DbError> {
        log::trace!("Store::uname_in_use( {:?} ) called.", uname);

        let client = self.connect().await?;
        let row = client.query_one(
            "SELECT EXISTS (SELECT 1 FROM users WHERE uname = $1)
                OR EXISTS (SELECT 1 FROM registration_requests WHERE uname = $1)",
            &[&uname]
        ).await?;
        Ok(row.try_get(0)?)
    }
}

/// Maintenance operations used to set up and inspect test state.
#[cfg(test)]
impl Store {
    pub async fn set_password_hash(&self, uname: &str, hash: &str) -> Result<(), DbError> {
        log::trace!("Store::set_password_hash( {:?}, [ hash ] ) called.", uname);

        let client = self.connect().await?;
        let n = client.execute(
            "UPDATE users SET hash = $1 WHERE uname = $2",
            &[&hash, &uname]
        ).await?;

        if n == 0 {
            Err(DbError(format!("There is no user with uname {:?}.", uname)))
        } else {
            Ok(())
        }
    }

    /// Deletes a user from the database, regardless of role. Profile rows go
    /// with it.
    pub async fn delete_user(&self, uname: &str) -> Result<(), DbError> {
        log::trace!("Store::delete_user( {:?} ) called.", uname);

        let client = self.connect().await?;
        let n = client.execute(
            "DELETE FROM users WHERE uname = $1",
            &[&uname]
        ).await?;

        if n == 0 {
            Err(DbError(format!("There is no user with uname {:?}.", uname)))
        } else {
            log::info!("Deleted user {:?}.", uname);
            Ok(())
        }
    }

    /// Number of `(faculty, students)` profile rows belonging to `uname`.
    pub async fn count_profile_rows(&self, uname: &str) -> Result<(i64, i64), DbError> {
        let client = self.connect().await?;
        let row = client.query_one(
            "SELECT (SELECT COUNT(*) FROM faculty WHERE uname = $1),
                    (SELECT COUNT(*) FROM students WHERE uname = $1)",
            &[&uname]
        ).await?;
        Ok((row.try_get(0)?, row.try_get(1)?))
    }
}
