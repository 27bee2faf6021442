/*!
Subcrate for interoperation with Student users.
*/
use crate::user::Role;
use super::*;

pub async fn dashboard(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("student::dashboard() called.");

    let glob = glob.read().await;
    let (key, u) = match require_role(&headers, &glob, Role::Student).await {
        Ok(x) => x,
        Err(r) => { return r; },
    };

    // A Student may be unenrolled, or enrolled in a course deleted since.
    let course = match &u {
        User::Student(s) => s.course.and_then(|id| glob.courses.get(&id)),
        _ => None,
    };

    let flash = take_flash(&glob, Some(&key)).await;
    let data = json!({
        "title": "Student Dashboard",
        "user": user_data(&u),
        "flash": flash,
        "course": course,
        "course_count": glob.courses.len(),
    });

    serve_template(StatusCode::OK, "student", &data, vec![])
}
