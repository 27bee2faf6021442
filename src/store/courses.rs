/*!
`Store` methods for courses.
*/
use std::collections::HashMap;

use tokio_postgres::Row;

use super::{Store, DbError};
use crate::course::Course;

fn course_from_row(row: &Row) -> Result<Course, DbError> {
    let crs = Course {
        id: row.try_get("id")?,
        code: row.try_get("code")?,
        name: row.try_get("name")?,
    };
    Ok(crs)
}

impl Store {
    pub async fn insert_course(&self, code: &str, name: &str) -> Result<Course, DbError> {
        log::trace!("Store::insert_course( {:?}, {:?} ) called.", code, name);

        let client = self.connect().await?;
        if client.query_opt(
            "SELECT id FROM courses WHERE code = $1", &[&code]
        ).await?.is_some() {
            return Err(DbError(format!("A course with code {:?} already exists.", code)));
        }

        let row = client.query_one(
            "INSERT INTO courses (code, name) VALUES ($1, $2) RETURNING id, code, name",
            &[&code, &name]
        ).await?;
        let crs = course_from_row(&row)?;

        log::info!("Inserted course {} ({:?}).", &crs.code, &crs.name);
        Ok(crs)
    }

    /// All courses, keyed by `id`.
    pub async fn get_courses(&self) -> Result<HashMap<i64, Course>, DbError> {
        log::trace!("Store::get_courses() called.");

        let client = self.connect().await?;
        let rows = client.query("SELECT * FROM courses", &[]).await?;
        let mut map: HashMap<i64, Course> = HashMap::with_capacity(rows.len());

        for row in rows.iter() {
            let crs = course_from_row(row)?;
            map.insert(crs.id, crs);
        }

        Ok(map)
    }

    /// Delete course `id`. Students enrolled in it are left unenrolled.
    pub async fn delete_course(&self, id: i64) -> Result<(), DbError> {
        log::trace!("Store::delete_course( {} ) called.", &id);

        let client = self.connect().await?;
        let n = client.execute("DELETE FROM courses WHERE id = $1", &[&id]).await?;

        if n == 0 {
            Err(DbError(format!("There is no course with id {}.", &id)))
        } else {
            log::info!("Deleted course {}.", &id);
            Ok(())
        }
    }
}
