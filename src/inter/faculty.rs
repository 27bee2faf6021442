/*!
Subcrate for interoperation with Faculty users.
*/
use crate::user::Role;
use super::*;

pub async fn dashboard(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("faculty::dashboard() called.");

    let glob = glob.read().await;
    let (key, u) = match require_role(&headers, &glob, Role::Faculty).await {
        Ok(x) => x,
        Err(r) => { return r; },
    };

    let department = match &u {
        User::Faculty(f) => f.department.as_deref(),
        _ => None,
    };

    let flash = take_flash(&glob, Some(&key)).await;
    let data = json!({
        "title": "Faculty Dashboard",
        "user": user_data(&u),
        "flash": flash,
        "department": department,
    });

    serve_template(StatusCode::OK, "faculty", &data, vec![])
}
