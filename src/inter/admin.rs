/*!
Subcrate for interoperation with Admin users.
*/
use axum::extract::Path as UrlPath;
use time::{format_description::FormatItem, macros::format_description};

use crate::{
    form::{CourseForm, FacultyForm, NewAccount, StudentForm},
    notify::Notice,
    store::Approval,
    user::{BaseUser, Role},
};
use super::*;

const CREATED_FMT: &[FormatItem] = format_description!(
    "[year]-[month]-[day] [hour]:[minute] UTC"
);

fn new_base_user(acct: &NewAccount, role: Role) -> BaseUser {
    BaseUser {
        uname: acct.uname.clone(),
        role,
        email: acct.email.clone(),
        first: acct.first.clone(),
        last: acct.last.clone(),
        active: true,
    }
}

pub async fn dashboard(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("admin::dashboard() called.");

    let glob = glob.read().await;
    let (key, u) = match require_role(&headers, &glob, Role::Admin).await {
        Ok(x) => x,
        Err(r) => { return r; },
    };

    let store = glob.store();
    let (n_stud, n_fac, n_req) = tokio::join!(
        store.count_active(Role::Student),
        store.count_active(Role::Faculty),
        store.count_requests(),
    );
    let (n_stud, n_fac, n_req) = match (n_stud, n_fac, n_req) {
        (Ok(s), Ok(f), Ok(r)) => (s, f, r),
        (s, f, r) => {
            log::error!(
                "Error counting for Admin dashboard: students {:?}, faculty {:?}, requests {:?}",
                &s, &f, &r
            );
            return html_500();
        },
    };

    let flash = take_flash(&glob, Some(&key)).await;
    let data = json!({
        "title": "Admin Dashboard",
        "user": user_data(&u),
        "flash": flash,
        "student_count": n_stud,
        "faculty_count": n_fac,
        "course_count": glob.courses.len(),
        "pending_requests_count": n_req,
    });

    serve_template(StatusCode::OK, "admin", &data, vec![])
}

/// Pending registration requests, newest first.
pub async fn requests(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("admin::requests() called.");

    let glob = glob.read().await;
    let (key, u) = match require_role(&headers, &glob, Role::Admin).await {
        Ok(x) => x,
        Err(r) => { return r; },
    };

    let reqs = match glob.store().get_requests().await {
        Ok(reqs) => reqs,
        Err(e) => {
            log::error!("Error retrieving registration requests: {}", &e);
            return html_500();
        },
    };

    let rows: Vec<serde_json::Value> = reqs.iter().map(|r| {
        let created = r.created.format(CREATED_FMT)
            .unwrap_or_else(|_| r.created.to_string());
        let name = format!("{} {}", &r.first, &r.last);
        json!({
            "id": r.id,
            "uname": &r.uname,
            "email": &r.email,
            "name": name.trim(),
            "role": r.role.to_string(),
            "created": created,
        })
    }).collect();

    let flash = take_flash(&glob, Some(&key)).await;
    let data = json!({
        "title": "Registration Requests",
        "user": user_data(&u),
        "flash": flash,
        "requests": rows,
    });

    serve_template(StatusCode::OK, "requests", &data, vec![])
}

pub async fn approve(
    headers: HeaderMap,
    UrlPath(id): UrlPath<i64>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("admin::approve( {} ) called.", &id);

    let glob = glob.read().await;
    let (key, _) = match require_role(&headers, &glob, Role::Admin).await {
        Ok(x) => x,
        Err(r) => { return r; },
    };

    let flash = match glob.store().approve_request(id).await {
        Err(e) => {
            log::error!("Error approving request {}: {}", &id, &e);
            return html_500();
        },
        Ok(Approval::NotFound) => {
            return respond_not_found("registration request");
        },
        Ok(Approval::Duplicate(uname)) => Flash::error(format!(
            "A user with the username '{}' already exists. The redundant request has been deleted.",
            &uname
        )),
        Ok(Approval::Approved(u)) => {
            glob.mailer.schedule(
                Notice::approval(u.uname(), u.email()),
                glob.approval_email_delay
            );
            Flash::success(format!(
                "Request for '{}' approved. An approval email will be sent shortly.",
                u.uname()
            ))
        },
    };

    redirect_with_flash(&glob, Some(&key), flash, "/admin/requests").await
}

pub async fn reject(
    headers: HeaderMap,
    UrlPath(id): UrlPath<i64>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("admin::reject( {} ) called.", &id);

    let glob = glob.read().await;
    let (key, _) = match require_role(&headers, &glob, Role::Admin).await {
        Ok(x) => x,
        Err(r) => { return r; },
    };

    let req = match glob.store().reject_request(id).await {
        Err(e) => {
            log::error!("Error rejecting request {}: {}", &id, &e);
            return html_500();
        },
        Ok(None) => {
            return respond_not_found("registration request");
        },
        Ok(Some(req)) => req,
    };

    glob.mailer.schedule(
        Notice::rejection(&req.uname, &req.email),
        glob.rejection_email_delay
    );

    let flash = Flash::warning(format!(
        "Request for '{}' rejected. A rejection email will be sent shortly.",
        &req.uname
    ));
    redirect_with_flash(&glob, Some(&key), flash, "/admin/requests").await
}

fn render_add_student(
    code: StatusCode,
    glob: &Glob,
    u: &User,
    form: &StudentForm,
    errors: &FormErrors,
) -> Response {
    let courses: Vec<serde_json::Value> = glob.sorted_courses().iter().map(|c| json!({
        "id": c.id,
        "code": &c.code,
        "name": &c.name,
        "selected": form.course.trim() == c.id.to_string(),
    })).collect();

    let data = json!({
        "title": "Add Student",
        "user": user_data(u),
        "form": form,
        "errors": errors,
        "courses": courses,
    });
    serve_template(code, "add_student", &data, vec![])
}

pub async fn add_student_page(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("admin::add_student_page() called.");

    let glob = glob.read().await;
    match require_role(&headers, &glob, Role::Admin).await {
        Err(r) => r,
        Ok((_, u)) => render_add_student(
            StatusCode::OK, &glob, &u, &StudentForm::default(), &FormErrors::default()
        ),
    }
}

/// Directly create an active Student account enrolled in a course.
pub async fn add_student(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<StudentForm>,
) -> Response {
    log::trace!("admin::add_student( {:?} ) called.", &form.account.uname);

    let glob = glob.read().await;
    let (key, u) = match require_role(&headers, &glob, Role::Admin).await {
        Ok(x) => x,
        Err(r) => { return r; },
    };

    let ns = match form.validate(|id| glob.courses.contains_key(&id)) {
        Ok(ns) => ns,
        Err(errs) => {
            return render_add_student(
                StatusCode::UNPROCESSABLE_ENTITY, &glob, &u, &form, &errs
            );
        },
    };

    match glob.store().uname_in_use(&ns.account.uname).await {
        Err(e) => {
            log::error!("Error checking uname {:?}: {}", &ns.account.uname, &e);
            return html_500();
        },
        Ok(true) => {
            let mut errs = FormErrors::default();
            errs.add("uname", "A user with that username already exists.");
            return render_add_student(
                StatusCode::UNPROCESSABLE_ENTITY, &glob, &u, &form, &errs
            );
        },
        Ok(false) => {},
    }

    let stud = new_base_user(&ns.account, Role::Student).into_student(Some(ns.course));
    let hash = match auth::spawn_hash(ns.account.password.clone()).await {
        Ok(hash) => hash,
        Err(e) => {
            log::error!("Error hashing password for Student {:?}: {}", &ns.account.uname, &e);
            return html_500();
        },
    };
    if let Err(e) = glob.store().insert_user(&stud, &hash).await {
        log::error!("Error inserting Student {:?}: {}", &ns.account.uname, &e);
        return html_500();
    }

    let course_name = glob.courses.get(&ns.course)
        .map(|c| c.name.as_str())
        .unwrap_or("their course");
    let flash = Flash::success(format!(
        "Student '{}' has been created and assigned to {}!",
        &ns.account.uname, course_name
    ));
    redirect_with_flash(&glob, Some(&key), flash, "/admin").await
}

fn render_add_faculty(
    code: StatusCode,
    u: &User,
    form: &FacultyForm,
    errors: &FormErrors,
) -> Response {
    let data = json!({
        "title": "Add Faculty",
        "user": user_data(u),
        "form": form,
        "errors": errors,
    });
    serve_template(code, "add_faculty", &data, vec![])
}

pub async fn add_faculty_page(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("admin::add_faculty_page() called.");

    let glob = glob.read().await;
    match require_role(&headers, &glob, Role::Admin).await {
        Err(r) => r,
        Ok((_, u)) => render_add_faculty(
            StatusCode::OK, &u, &FacultyForm::default(), &FormErrors::default()
        ),
    }
}

/// Directly create an active Faculty account.
pub async fn add_faculty(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<FacultyForm>,
) -> Response {
    log::trace!("admin::add_faculty( {:?} ) called.", &form.account.uname);

    let glob = glob.read().await;
    let (key, u) = match require_role(&headers, &glob, Role::Admin).await {
        Ok(x) => x,
        Err(r) => { return r; },
    };

    let nf = match form.validate() {
        Ok(nf) => nf,
        Err(errs) => {
            return render_add_faculty(StatusCode::UNPROCESSABLE_ENTITY, &u, &form, &errs);
        },
    };

    match glob.store().uname_in_use(&nf.account.uname).await {
        Err(e) => {
            log::error!("Error checking uname {:?}: {}", &nf.account.uname, &e);
            return html_500();
        },
        Ok(true) => {
            let mut errs = FormErrors::default();
            errs.add("uname", "A user with that username already exists.");
            return render_add_faculty(StatusCode::UNPROCESSABLE_ENTITY, &u, &form, &errs);
        },
        Ok(false) => {},
    }

    let fac = new_base_user(&nf.account, Role::Faculty).into_faculty(nf.department.clone());
    let hash = match auth::spawn_hash(nf.account.password.clone()).await {
        Ok(hash) => hash,
        Err(e) => {
            log::error!("Error hashing password for Faculty {:?}: {}", &nf.account.uname, &e);
            return html_500();
        },
    };
    if let Err(e) = glob.store().insert_user(&fac, &hash).await {
        log::error!("Error inserting Faculty {:?}: {}", &nf.account.uname, &e);
        return html_500();
    }

    let flash = Flash::success(format!(
        "Faculty '{}' has been created successfully!", &nf.account.uname
    ));
    redirect_with_flash(&glob, Some(&key), flash, "/admin").await
}

//
//
// This section is for dealing with COURSES.
//
//

fn render_courses(
    code: StatusCode,
    glob: &Glob,
    u: &User,
    form: &CourseForm,
    errors: &FormErrors,
    flash: &[Flash],
) -> Response {
    let data = json!({
        "title": "Courses",
        "user": user_data(u),
        "flash": flash,
        "courses": glob.sorted_courses(),
        "form": form,
        "errors": errors,
    });
    serve_template(code, "courses", &data, vec![])
}

pub async fn courses(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("admin::courses() called.");

    let glob = glob.read().await;
    let (key, u) = match require_role(&headers, &glob, Role::Admin).await {
        Ok(x) => x,
        Err(r) => { return r; },
    };

    let flash = take_flash(&glob, Some(&key)).await;
    render_courses(
        StatusCode::OK, &glob, &u, &CourseForm::default(), &FormErrors::default(), &flash
    )
}

/// Reread the course list after a change. Returns the 500 response on failure.
async fn refresh_courses(glob: &Arc<RwLock<Glob>>) -> Result<(), Response> {
    if let Err(e) = glob.write().await.refresh_courses().await {
        log::error!("Error refreshing course hash from database: {}", &e);
        return Err(html_500());
    }
    Ok(())
}

pub async fn add_course(
    headers: HeaderMap,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
    Form(form): Form<CourseForm>,
) -> Response {
    log::trace!("admin::add_course( {:?} ) called.", &form);

    let key = {
        let glob = glob.read().await;
        let (key, u) = match require_role(&headers, &glob, Role::Admin).await {
            Ok(x) => x,
            Err(r) => { return r; },
        };

        let (code, name) = match form.validate() {
            Ok(x) => x,
            Err(errs) => {
                return render_courses(
                    StatusCode::UNPROCESSABLE_ENTITY, &glob, &u, &form, &errs, &[]
                );
            },
        };

        if glob.courses.values().any(|c| c.code == code) {
            let mut errs = FormErrors::default();
            errs.add("code", "A course with that code already exists.");
            return render_courses(
                StatusCode::UNPROCESSABLE_ENTITY, &glob, &u, &form, &errs, &[]
            );
        }

        if let Err(e) = glob.store().insert_course(&code, &name).await {
            log::error!("Error inserting course {:?}: {}", &code, &e);
            return html_500();
        }
        key
    };

    if let Err(r) = refresh_courses(&glob).await {
        return r;
    }

    let glob = glob.read().await;
    let flash = Flash::success(format!("Course '{}' added.", form.code.trim()));
    redirect_with_flash(&glob, Some(&key), flash, "/admin/courses").await
}

pub async fn delete_course(
    headers: HeaderMap,
    UrlPath(id): UrlPath<i64>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>,
) -> Response {
    log::trace!("admin::delete_course( {} ) called.", &id);

    let (key, code) = {
        let glob = glob.read().await;
        let (key, _) = match require_role(&headers, &glob, Role::Admin).await {
            Ok(x) => x,
            Err(r) => { return r; },
        };

        let code = match glob.courses.get(&id) {
            Some(c) => c.code.clone(),
            None => { return respond_not_found("course"); },
        };

        if let Err(e) = glob.store().delete_course(id).await {
            log::error!("Error deleting course {}: {}", &id, &e);
            return html_500();
        }
        (key, code)
    };

    if let Err(r) = refresh_courses(&glob).await {
        return r;
    }

    let glob = glob.read().await;
    let flash = Flash::warning(format!("Course '{}' deleted.", &code));
    redirect_with_flash(&glob, Some(&key), flash, "/admin/courses").await
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serial_test::serial;

    use crate::config::Cfg;
    use crate::form::{AccountFields, LoginForm, RegistrationForm};
    use crate::inter::tests::{body_text, cookie_headers, location, offline_glob};
    use crate::store::{Store, tests::TEST_CONNECTION};
    use crate::tests::ensure_logging;

    fn db_glob(spool: &std::path::Path) -> Arc<RwLock<Glob>> {
        ensure_logging();
        init("templates").unwrap();
        let cfg = Cfg {
            db_connect_string: TEST_CONNECTION.to_owned(),
            mail_spool: spool.to_path_buf(),
            approval_email_delay: 0,
            rejection_email_delay: 0,
            ..Cfg::default()
        };
        Arc::new(RwLock::new(Glob::from_cfg(&cfg).unwrap()))
    }

    fn new_key(r: &Response) -> String {
        let cookie = r.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        let pair = cookie.split(';').next().unwrap();
        pair.split_once('=').unwrap().1.to_owned()
    }

    fn account(uname: &str, password: &str) -> AccountFields {
        AccountFields {
            uname: uname.to_owned(),
            email: format!("{}@campus.test", uname),
            first_name: "Test".to_owned(),
            last_name: uname.to_owned(),
            password: password.to_owned(),
            password2: password.to_owned(),
        }
    }

    async fn log_in(glob: &Arc<RwLock<Glob>>, uname: &str, password: &str) -> Response {
        let form = LoginForm { uname: uname.to_owned(), password: password.to_owned() };
        login(HeaderMap::new(), Extension(glob.clone()), Form(form)).await
    }

    async fn request_id(db: &Store, uname: &str) -> i64 {
        db.get_requests().await.unwrap()
            .into_iter()
            .find(|r| r.uname == uname)
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn admin_actions_need_a_login() {
        let glob = offline_glob();

        let r = approve(HeaderMap::new(), UrlPath(1), Extension(glob.clone())).await;
        assert_eq!(r.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&r), "/login");

        let r = reject(cookie_headers("stale"), UrlPath(1), Extension(glob.clone())).await;
        assert_eq!(location(&r), "/login");

        let r = add_course(
            HeaderMap::new(), Extension(glob.clone()), Form(CourseForm::default())
        ).await;
        assert_eq!(location(&r), "/login");

        let r = add_student(
            HeaderMap::new(), Extension(glob), Form(StudentForm::default())
        ).await;
        assert_eq!(location(&r), "/login");
    }

    #[tokio::test]
    #[ignore]
    #[serial]
    async fn registration_workflow() {
        let spool = std::env::temp_dir().join(format!(
            "campus-spool-workflow-{}", std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&spool);
        let glob = db_glob(&spool);
        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        let root = BaseUser {
            uname: "root".to_owned(),
            role: Role::Admin,
            email: "root@campus.test".to_owned(),
            first: String::new(),
            last: String::new(),
            active: true,
        }.into_admin();
        db.insert_user(&root, &auth::hash_password("toot").unwrap()).await.unwrap();

        let r = log_in(&glob, "root", "wrong password").await;
        assert_eq!(r.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(r).await.contains("Invalid username or password"));

        let r = log_in(&glob, "root", "toot").await;
        assert_eq!(location(&r), "/dashboard");
        let admin = cookie_headers(&new_key(&r));
        let r = super::super::dashboard(admin.clone(), Extension(glob.clone())).await;
        assert_eq!(location(&r), "/admin");

        // Two sign-ups: a student to approve and a faculty member to reject.
        for (uname, role) in [("jdoe", "3"), ("jroe", "2")] {
            let form = RegistrationForm {
                account: account(uname, "hunter2222"),
                role: role.to_owned(),
            };
            let r = register(HeaderMap::new(), Extension(glob.clone()), Form(form)).await;
            assert_eq!(location(&r), "/login");
        }
        assert_eq!(db.count_requests().await.unwrap(), 2);

        // A username with a pending request can't be requested again.
        let form = RegistrationForm { account: account("jdoe", "hunter2222"), role: "2".to_owned() };
        let r = register(HeaderMap::new(), Extension(glob.clone()), Form(form)).await;
        assert_eq!(r.status(), StatusCode::UNPROCESSABLE_ENTITY);

        // Not approved yet.
        let r = log_in(&glob, "jdoe", "hunter2222").await;
        assert_eq!(r.status(), StatusCode::UNAUTHORIZED);

        let id = request_id(&db, "jdoe").await;
        let r = approve(admin.clone(), UrlPath(id), Extension(glob.clone())).await;
        assert_eq!(location(&r), "/admin/requests");
        let u = db.get_user_by_uname("jdoe").await.unwrap().unwrap();
        assert_eq!(u.role(), Role::Student);
        assert!(u.is_active());
        assert_eq!(db.count_profile_rows("jdoe").await.unwrap(), (0, 1));

        let id = request_id(&db, "jroe").await;
        let r = reject(admin.clone(), UrlPath(id), Extension(glob.clone())).await;
        assert_eq!(location(&r), "/admin/requests");
        assert_eq!(db.get_user_by_uname("jroe").await.unwrap(), None);
        assert_eq!(db.count_profile_rows("jroe").await.unwrap(), (0, 0));
        assert_eq!(db.count_requests().await.unwrap(), 0);

        let r = approve(admin.clone(), UrlPath(id), Extension(glob.clone())).await;
        assert_eq!(r.status(), StatusCode::NOT_FOUND);

        let r = requests(admin.clone(), Extension(glob.clone())).await;
        let body = body_text(r).await;
        assert!(body.contains("approved. An approval email will be sent shortly."));
        assert!(body.contains("rejected. A rejection email will be sent shortly."));
        assert!(body.contains("No pending requests."));

        // A request that collides with an existing account is discarded.
        db.insert_request(
            "jdoe", &auth::hash_password("other password").unwrap(), "x@campus.test",
            "X", "Y", Role::Faculty
        ).await.unwrap();
        let id = request_id(&db, "jdoe").await;
        let r = approve(admin.clone(), UrlPath(id), Extension(glob.clone())).await;
        assert_eq!(location(&r), "/admin/requests");
        assert_eq!(db.count_requests().await.unwrap(), 0);
        assert_eq!(
            db.get_user_by_uname("jdoe").await.unwrap().unwrap().role(),
            Role::Student
        );
        let body = body_text(requests(admin.clone(), Extension(glob.clone())).await).await;
        assert!(body.contains("redundant request has been deleted"));

        // The approved student can log in, and only sees student pages.
        let r = log_in(&glob, "jdoe", "hunter2222").await;
        let stud = cookie_headers(&new_key(&r));
        let r = super::super::dashboard(stud.clone(), Extension(glob.clone())).await;
        assert_eq!(location(&r), "/student");
        let r = dashboard(stud.clone(), Extension(glob.clone())).await;
        assert_eq!(location(&r), "/student");

        // Courses and directly-created accounts.
        let form = CourseForm { code: "PHY1".to_owned(), name: "Physics I".to_owned() };
        let r = add_course(admin.clone(), Extension(glob.clone()), Form(form)).await;
        assert_eq!(location(&r), "/admin/courses");
        let crs_id = *glob.read().await.courses.keys().next().unwrap();

        let form = StudentForm { account: account("jsmith", "password1"), course: crs_id.to_string() };
        let r = add_student(admin.clone(), Extension(glob.clone()), Form(form)).await;
        assert_eq!(location(&r), "/admin");
        let u = db.get_user_by_uname("jsmith").await.unwrap().unwrap();
        assert_eq!(u, BaseUser {
            uname: "jsmith".to_owned(),
            role: Role::Student,
            email: "jsmith@campus.test".to_owned(),
            first: "Test".to_owned(),
            last: "jsmith".to_owned(),
            active: true,
        }.into_student(Some(crs_id)));
        assert_eq!(db.count_profile_rows("jsmith").await.unwrap(), (0, 1));

        let form = FacultyForm { account: account("berro", "password1"), department: "Physics".to_owned() };
        let r = add_faculty(admin.clone(), Extension(glob.clone()), Form(form)).await;
        assert_eq!(location(&r), "/admin");
        assert_eq!(db.count_profile_rows("berro").await.unwrap(), (1, 0));

        let body = body_text(dashboard(admin.clone(), Extension(glob.clone())).await).await;
        assert!(body.contains("assigned to Physics I!"));
        assert!(body.contains("<td>2</td>"));

        // Both emails have been spooled by now.
        tokio::time::sleep(Duration::from_millis(500)).await;
        let n_spooled = std::fs::read_dir(&spool).unwrap().count();
        assert_eq!(n_spooled, 2);

        db.nuke_database().await.unwrap();
        let _ = std::fs::remove_dir_all(&spool);
    }
}
