/*!
`Store` methods for pending registration requests, including the
approve/reject transitions that resolve them.
*/
use tokio_postgres::Row;

use super::{Store, DbError};
use super::users::{check_existing_user_role, insert_user_with};
use crate::user::*;

fn request_from_row(row: &Row) -> Result<RegistrationRequest, DbError> {
    log::trace!("request_from_row( {:?} ) called", row);

    let role_str: &str = row.try_get("role")?;
    let req = RegistrationRequest {
        id: row.try_get("id")?,
        uname: row.try_get("uname")?,
        hash: row.try_get("hash")?,
        email: row.try_get("email")?,
        first: row.try_get("first_name")?,
        last: row.try_get("last_name")?,
        role: role_str.parse()?,
        created: row.try_get("created")?,
    };

    Ok(req)
}

/// Outcome of approving a registration request.
#[derive(Debug, PartialEq)]
pub enum Approval {
    /// The account and its profile were created; the request is gone.
    Approved(User),
    /// An account already holds this uname. The stale request was deleted
    /// and nothing was created.
    Duplicate(String),
    /// No request has that id.
    NotFound,
}

impl Store {
    /// Record a sign-up for later review. `hash` must already be hashed.
    ///
    /// Returns the new request's id.
    pub async fn insert_request(
        &self,
        uname: &str,
        hash: &str,
        email: &str,
        first: &str,
        last: &str,
        role: Role,
    ) -> Result<i64, DbError> {
        log::trace!(
            "Store::insert_request( {:?}, [ hash ], {:?}, {:?}, {:?}, {} ) called.",
            uname, email, first, last, &role
        );

        let client = self.connect().await?;
        let row = client.query_one(
            "INSERT INTO registration_requests
                (uname, hash, email, first_name, last_name, role)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id",
            &[&uname, &hash, &email, &first, &last, &role.to_string()]
        ).await?;
        let id: i64 = row.try_get("id")?;

        log::info!("Registration request {} from {:?} ({}) recorded.", &id, uname, &role);
        Ok(id)
    }

    /// All pending requests, newest first.
    pub async fn get_requests(&self) -> Result<Vec<RegistrationRequest>, DbError> {
        log::trace!("Store::get_requests() called.");

        let client = self.connect().await?;
        let rows = client.query(
            "SELECT * FROM registration_requests ORDER BY created DESC, id DESC",
            &[]
        ).await?;

        let mut reqs = Vec::with_capacity(rows.len());
        for row in rows.iter() {
            reqs.push(request_from_row(row)?);
        }
        Ok(reqs)
    }

    pub async fn count_requests(&self) -> Result<i64, DbError> {
        log::trace!("Store::count_requests() called.");

        let client = self.connect().await?;
        let row = client.query_one(
            "SELECT COUNT(*) FROM registration_requests", &[]
        ).await?;
        Ok(row.try_get(0)?)
    }

    /**
    Turn request `id` into an active account with its role profile.

    Creating the account and deleting the request happen in one transaction:
    either both happen, or neither does. If the uname has been taken since
    the request was made, the request is deleted without creating anything.
    */
    pub async fn approve_request(&self, id: i64) -> Result<Approval, DbError> {
        log::trace!("Store::approve_request( {} ) called.", &id);

        let mut client = self.connect().await?;
        let t = client.transaction().await?;

        // Held until commit, so no other account with this uname can appear
        // between the existence check and the insert below.
        t.execute("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE", &[]).await
            .map_err(|e| DbError::from(e).annotate("Unable to lock users table"))?;

        let req = match t.query_opt(
            "SELECT * FROM registration_requests WHERE id = $1 FOR UPDATE",
            &[&id]
        ).await? {
            None => { return Ok(Approval::NotFound); },
            Some(row) => request_from_row(&row)?,
        };

        t.execute(
            "DELETE FROM registration_requests WHERE id = $1",
            &[&id]
        ).await?;

        if let Some(role) = check_existing_user_role(&t, &req.uname).await? {
            t.commit().await?;
            log::warn!(
                "Request {} for uname {:?} duplicates an existing {}; deleted.",
                &id, &req.uname, &role
            );
            return Ok(Approval::Duplicate(req.uname));
        }

        let (base, hash) = req.into_base_user();
        let u = match base.role {
            Role::Faculty => base.into_faculty(None),
            Role::Student => base.into_student(None),
            Role::Admin => {
                return Err(DbError(format!(
                    "Request {} asks for an Admin account; refusing.", &id
                )));
            },
        };

        insert_user_with(&t, &u, &hash).await
            .map_err(|e| e.annotate("Error creating approved account"))?;

        t.commit().await?;
        log::info!("Request {} approved: {} {:?} created.", &id, u.role(), u.uname());
        Ok(Approval::Approved(u))
    }

    /// Delete request `id` without creating an account. Returns the deleted
    /// request, or `None` if there was none.
    pub async fn reject_request(
        &self,
        id: i64
    ) -> Result<Option<RegistrationRequest>, DbError> {
        log::trace!("Store::reject_request( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt(
            "DELETE FROM registration_requests WHERE id = $1 RETURNING *",
            &[&id]
        ).await? {
            None => Ok(None),
            Some(row) => {
                let req = request_from_row(&row)?;
                log::info!("Request {} from {:?} rejected.", &id, &req.uname);
                Ok(Some(req))
            },
        }
    }
}

#[cfg(test)]
impl Store {
    pub async fn get_request(&self, id: i64) -> Result<Option<RegistrationRequest>, DbError> {
        log::trace!("Store::get_request( {} ) called.", &id);

        let client = self.connect().await?;
        match client.query_opt(
            "SELECT * FROM registration_requests WHERE id = $1",
            &[&id]
        ).await? {
            None => Ok(None),
            Some(row) => Ok(Some(request_from_row(&row)?)),
        }
    }
}
