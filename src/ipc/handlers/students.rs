use crate::error::ServiceError;
use crate::ipc::envelope::{created, fail, fail_err, ok};
use crate::ipc::types::{AppState, Request};
use crate::reconcile::{self, ScoreMode, SkillEntry};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const PAGE_SIZE: i64 = 10;

struct StudentRow {
    id: String,
    code: String,
}

fn find_student(conn: &Connection, code: &str) -> Result<Option<StudentRow>, rusqlite::Error> {
    conn.query_row(
        "SELECT id, code FROM students WHERE code = ?",
        [code],
        |row| {
            Ok(StudentRow {
                id: row.get(0)?,
                code: row.get(1)?,
            })
        },
    )
    .optional()
}

fn param_code(req: &Request) -> Option<String> {
    req.params
        .get("code")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn activities_json(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.name, a.description, a.type
         FROM student_activities sa
         JOIN activities a ON a.id = sa.activity_id
         WHERE sa.student_id = ?
         ORDER BY a.id",
    )?;
    let rows = stmt
        .query_map([student_id], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let description: Option<String> = row.get(2)?;
            let activity_type: String = row.get(3)?;
            Ok(json!({ "id": id, "name": name, "description": description, "type": activity_type }))
        })?
        .collect::<Result<Vec<_>, _>>();
    rows
}

fn evaluations_json(
    conn: &Connection,
    student_id: &str,
) -> Result<Vec<serde_json::Value>, rusqlite::Error> {
    // Most-recent-first; rowid breaks created-at ties deterministically.
    let mut stmt = conn.prepare(
        "SELECT id FROM evaluations WHERE student_id = ?
         ORDER BY created_at DESC, rowid DESC",
    )?;
    let ids = stmt
        .query_map([student_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(ev) = reconcile::evaluation_json(conn, &id)? {
            out.push(ev);
        }
    }
    Ok(out)
}

fn latest_evaluation_id(
    conn: &Connection,
    student_id: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT id FROM evaluations WHERE student_id = ?
         ORDER BY created_at DESC, rowid DESC LIMIT 1",
        [student_id],
        |row| row.get(0),
    )
    .optional()
}

fn handle_index(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };

    let page = req
        .params
        .get("page")
        .and_then(|v| v.as_i64())
        .unwrap_or(1)
        .max(1);
    let query = req
        .params
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .trim()
        .to_string();

    let result = (|| -> Result<serde_json::Value, rusqlite::Error> {
        let like = format!("%{}%", query.to_lowercase());
        let filter = "(? = '%%'
             OR LOWER(st.code) LIKE ?
             OR LOWER(st.name) LIKE ?
             OR LOWER(st.email) LIKE ?
             OR EXISTS (
                 SELECT 1 FROM student_activities sa
                 JOIN activities a ON a.id = sa.activity_id
                 WHERE sa.student_id = st.id AND LOWER(a.name) LIKE ?
             ))";

        let sql = format!(
            "SELECT st.code, st.name, st.email, sp.name, g.name
             FROM students st
             JOIN specialties sp ON sp.id = st.specialty_id
             JOIN grades g ON g.id = st.grade_id
             WHERE {filter}
             ORDER BY st.rowid DESC
             LIMIT ? OFFSET ?"
        );
        let mut stmt = conn.prepare(&sql)?;
        let students = stmt
            .query_map(
                (&like, &like, &like, &like, &like, PAGE_SIZE, (page - 1) * PAGE_SIZE),
                |row| {
                    let code: String = row.get(0)?;
                    let name: String = row.get(1)?;
                    let email: String = row.get(2)?;
                    let specialty: String = row.get(3)?;
                    let grade: String = row.get(4)?;
                    Ok(json!({
                        "code": code,
                        "name": name,
                        "email": email,
                        "specialty": { "name": specialty },
                        "grade": { "name": grade }
                    }))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let count_sql = format!("SELECT COUNT(*) FROM students st WHERE {filter}");
        let total: i64 = conn.query_row(
            &count_sql,
            (&like, &like, &like, &like, &like),
            |r| r.get(0),
        )?;

        Ok(json!({
            "students": students,
            "meta": {
                "currentPage": page,
                "perPage": PAGE_SIZE,
                "total": total,
                "lastPage": (total + PAGE_SIZE - 1) / PAGE_SIZE
            }
        }))
    })();

    match result {
        Ok(data) => ok(&req.id, "students fetched successfully", Some(data)),
        Err(e) => fail(&req.id, 500, e.to_string()),
    }
}

fn handle_show(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };
    let Some(code) = param_code(req) else {
        return fail(&req.id, 400, "missing code");
    };

    let result = (|| -> Result<Option<serde_json::Value>, rusqlite::Error> {
        let head = conn
            .query_row(
                "SELECT st.id, st.code, st.name, st.email, st.phone, st.address,
                        st.birth_date, st.birth_place, st.enrollment_year,
                        st.grade_id, g.name, st.specialty_id, sp.name, st.created_at
                 FROM students st
                 JOIN grades g ON g.id = st.grade_id
                 JOIN specialties sp ON sp.id = st.specialty_id
                 WHERE st.code = ?",
                [&code],
                |row| {
                    let id: String = row.get(0)?;
                    let code: String = row.get(1)?;
                    let name: String = row.get(2)?;
                    let email: String = row.get(3)?;
                    let phone: String = row.get(4)?;
                    let address: String = row.get(5)?;
                    let birth_date: String = row.get(6)?;
                    let birth_place: String = row.get(7)?;
                    let enrollment_year: String = row.get(8)?;
                    let grade_id: i64 = row.get(9)?;
                    let grade_name: String = row.get(10)?;
                    let specialty_id: i64 = row.get(11)?;
                    let specialty_name: String = row.get(12)?;
                    let created_at: String = row.get(13)?;
                    Ok((
                        id,
                        json!({
                            "code": code,
                            "name": name,
                            "email": email,
                            "phone": phone,
                            "address": address,
                            "birth_date": birth_date,
                            "birth_place": birth_place,
                            "enrollment_year": enrollment_year,
                            "gradeId": grade_id,
                            "grade": { "name": grade_name },
                            "specialtyId": specialty_id,
                            "specialty": { "name": specialty_name },
                            "createdAt": created_at
                        }),
                    ))
                },
            )
            .optional()?;

        let Some((student_id, mut student)) = head else {
            return Ok(None);
        };
        student["activities"] = json!(activities_json(conn, &student_id)?);
        student["evaluations"] = json!(evaluations_json(conn, &student_id)?);
        Ok(Some(student))
    })();

    match result {
        Ok(Some(student)) => ok(&req.id, "student fetched successfully", Some(student)),
        Ok(None) => fail(&req.id, 404, "student not found"),
        Err(e) => fail(&req.id, 500, e.to_string()),
    }
}

struct StudentParams {
    name: String,
    email: String,
    phone: String,
    address: String,
    birth_date: String,
    birth_place: String,
    enrollment_year: String,
    grade_id: i64,
    specialty_id: i64,
}

fn parse_student_params(conn: &Connection, req: &Request) -> Result<StudentParams, ServiceError> {
    let text = |field: &str| -> Result<String, ServiceError> {
        req.params
            .get(field)
            .and_then(|v| v.as_str())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ServiceError::BadRequest(format!("missing {field}")))
    };

    let grade_id = req
        .params
        .get("gradeId")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ServiceError::BadRequest("missing gradeId".to_string()))?;
    let specialty_id = req
        .params
        .get("specialtyId")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| ServiceError::BadRequest("missing specialtyId".to_string()))?;

    let mut stmt = conn.prepare("SELECT 1 FROM grades WHERE id = ?")?;
    if !stmt.exists([grade_id])? {
        return Err(ServiceError::InvalidReference {
            kind: "grade",
            id: grade_id,
        });
    }
    let mut stmt = conn.prepare("SELECT 1 FROM specialties WHERE id = ?")?;
    if !stmt.exists([specialty_id])? {
        return Err(ServiceError::InvalidReference {
            kind: "specialty",
            id: specialty_id,
        });
    }

    Ok(StudentParams {
        name: text("name")?,
        email: text("email")?,
        phone: text("phone")?,
        address: text("address")?,
        birth_date: text("birth_date")?,
        birth_place: text("birth_place")?,
        enrollment_year: text("enrollment_year")?,
        grade_id,
        specialty_id,
    })
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };
    let Some(code) = param_code(req) else {
        return fail(&req.id, 400, "missing code");
    };

    let params = match parse_student_params(conn, req) {
        Ok(p) => p,
        Err(e) => return fail_err(&req.id, &e),
    };

    match find_student(conn, &code) {
        Ok(Some(_)) => return fail(&req.id, 400, "a student with this code already exists"),
        Ok(None) => {}
        Err(e) => return fail(&req.id, 500, e.to_string()),
    }

    if let Err(e) = conn.execute(
        "INSERT INTO students(id, code, name, email, phone, address, birth_date,
         birth_place, enrollment_year, grade_id, specialty_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &code,
            &params.name,
            &params.email,
            &params.phone,
            &params.address,
            &params.birth_date,
            &params.birth_place,
            &params.enrollment_year,
            params.grade_id,
            params.specialty_id,
            chrono::Utc::now().to_rfc3339(),
        ),
    ) {
        return fail(&req.id, 500, e.to_string());
    }

    created(&req.id, "student created successfully", None)
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };
    let Some(code) = param_code(req) else {
        return fail(&req.id, 400, "missing code");
    };

    let params = match parse_student_params(conn, req) {
        Ok(p) => p,
        Err(e) => return fail_err(&req.id, &e),
    };

    let updated = match conn.execute(
        "UPDATE students SET name = ?, email = ?, phone = ?, address = ?,
         birth_date = ?, birth_place = ?, enrollment_year = ?,
         grade_id = ?, specialty_id = ?
         WHERE code = ?",
        (
            &params.name,
            &params.email,
            &params.phone,
            &params.address,
            &params.birth_date,
            &params.birth_place,
            &params.enrollment_year,
            params.grade_id,
            params.specialty_id,
            &code,
        ),
    ) {
        Ok(n) => n,
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };
    if updated == 0 {
        return fail(&req.id, 404, "student not found");
    }

    ok(&req.id, "student updated successfully", None)
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };
    let Some(code) = param_code(req) else {
        return fail(&req.id, 400, "missing code");
    };

    let student = match find_student(conn, &code) {
        Ok(Some(s)) => s,
        Ok(None) => return fail(&req.id, 404, "student not found"),
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };

    // Explicit dependency order; associations never outlive their owner.
    let steps = [
        (
            "DELETE FROM skill_evaluations WHERE evaluation_id IN (
               SELECT id FROM evaluations WHERE student_id = ?
             )",
            "skill_evaluations",
        ),
        ("DELETE FROM evaluations WHERE student_id = ?", "evaluations"),
        (
            "DELETE FROM student_activities WHERE student_id = ?",
            "student_activities",
        ),
        ("DELETE FROM students WHERE id = ?", "students"),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&student.id]) {
            let _ = tx.rollback();
            return fail(&req.id, 500, format!("failed deleting from {table}: {e}"));
        }
    }
    if let Err(e) = tx.commit() {
        return fail(&req.id, 500, format!("transaction failed: {e}"));
    }

    ok(&req.id, "deleted", None)
}

fn handle_update_activities(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };
    let Some(code) = param_code(req) else {
        return fail(&req.id, 400, "missing code");
    };
    let Some(ids) = req.params.get("activityIds").and_then(|v| v.as_array()) else {
        return fail(&req.id, 400, "missing activityIds");
    };
    let mut activity_ids = Vec::with_capacity(ids.len());
    for v in ids {
        match v.as_i64() {
            Some(id) => activity_ids.push(id),
            None => return fail(&req.id, 400, "activityIds must be integers"),
        }
    }

    let student = match find_student(conn, &code) {
        Ok(Some(s)) => s,
        Ok(None) => return fail(&req.id, 404, "student not found"),
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };

    let result = (|| -> Result<(), ServiceError> {
        let mut stmt = conn.prepare("SELECT 1 FROM activities WHERE id = ?")?;
        for id in &activity_ids {
            if !stmt.exists([*id])? {
                return Err(ServiceError::InvalidReference {
                    kind: "activity",
                    id: *id,
                });
            }
        }
        drop(stmt);

        let mut stmt =
            conn.prepare("SELECT activity_id FROM student_activities WHERE student_id = ?")?;
        let current = stmt
            .query_map([&student.id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);

        // Same replace-by-diff discipline as skill reconciliation, minus scores.
        let incoming: std::collections::HashSet<i64> = activity_ids.iter().copied().collect();
        let to_delete: Vec<i64> = current
            .iter()
            .copied()
            .filter(|id| !incoming.contains(id))
            .collect();

        let tx = conn.unchecked_transaction()?;
        let applied = (|| -> Result<(), rusqlite::Error> {
            for id in &to_delete {
                tx.execute(
                    "DELETE FROM student_activities WHERE student_id = ? AND activity_id = ?",
                    (&student.id, id),
                )?;
            }
            for id in &activity_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO student_activities(student_id, activity_id) VALUES(?, ?)",
                    (&student.id, id),
                )?;
            }
            Ok(())
        })();
        match applied {
            Ok(()) => tx
                .commit()
                .map_err(|e| ServiceError::TransactionFailed(e.to_string())),
            Err(e) => {
                let _ = tx.rollback();
                Err(ServiceError::TransactionFailed(e.to_string()))
            }
        }
    })();

    if let Err(e) = result {
        return fail_err(&req.id, &e);
    }

    match activities_json(conn, &student.id) {
        Ok(activities) => ok(
            &req.id,
            "updated successfully",
            Some(json!({ "activities": activities })),
        ),
        Err(e) => fail(&req.id, 500, e.to_string()),
    }
}

fn handle_update_skills(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };
    let Some(code) = param_code(req) else {
        return fail(&req.id, 400, "missing code");
    };
    let Some(ids) = req.params.get("skillIds").and_then(|v| v.as_array()) else {
        return fail(&req.id, 400, "missing skillIds");
    };
    let mut incoming = Vec::with_capacity(ids.len());
    for v in ids {
        match v.as_i64() {
            Some(id) => incoming.push(SkillEntry {
                skill_id: id,
                score: None,
            }),
            None => return fail(&req.id, 400, "skillIds must be integers"),
        }
    }

    let student = match find_student(conn, &code) {
        Ok(Some(s)) => s,
        Ok(None) => return fail(&req.id, 404, "student not found"),
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };

    // Bare skill attachments target the student's most recent evaluation;
    // scores already stored for kept skills are preserved.
    let evaluation_id = match latest_evaluation_id(conn, &student.id) {
        Ok(Some(id)) => id,
        Ok(None) => return fail(&req.id, 404, format!("student {} has no evaluation", student.code)),
        Err(e) => return fail(&req.id, 500, e.to_string()),
    };

    if let Err(e) = reconcile::reconcile(conn, &evaluation_id, &incoming, None, ScoreMode::Preserve)
    {
        return fail_err(&req.id, &e);
    }

    match reconcile::evaluation_json(conn, &evaluation_id) {
        Ok(Some(evaluation)) => ok(
            &req.id,
            "student skills updated successfully",
            Some(json!({ "evaluation": evaluation })),
        ),
        Ok(None) => fail(&req.id, 404, "evaluation not found"),
        Err(e) => fail(&req.id, 500, e.to_string()),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "student.index" => Some(handle_index(state, req)),
        "student.show" => Some(handle_show(state, req)),
        "student.create" => Some(handle_create(state, req)),
        "student.update" => Some(handle_update(state, req)),
        "student.delete" => Some(handle_delete(state, req)),
        "student.updateActivities" => Some(handle_update_activities(state, req)),
        "student.updateSkills" => Some(handle_update_skills(state, req)),
        _ => None,
    }
}
