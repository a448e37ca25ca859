use crate::ipc::envelope::{fail, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_specialties_with_grades(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return fail(&req.id, 400, "select a workspace first");
    };

    let specialties = (|| -> Result<Vec<serde_json::Value>, rusqlite::Error> {
        let mut spec_stmt = conn.prepare("SELECT id, name FROM specialties ORDER BY name")?;
        let mut grade_stmt = conn.prepare(
            "SELECT g.id, g.name
             FROM specialty_grades sg
             JOIN grades g ON g.id = sg.grade_id
             WHERE sg.specialty_id = ?
             ORDER BY g.id",
        )?;

        let heads = spec_stmt
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(heads.len());
        for (id, name) in heads {
            let grades = grade_stmt
                .query_map([id], |row| {
                    let gid: i64 = row.get(0)?;
                    let gname: String = row.get(1)?;
                    Ok(json!({ "id": gid, "name": gname }))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            out.push(json!({ "id": id, "name": name, "grades": grades }));
        }
        Ok(out)
    })();

    match specialties {
        Ok(specialties) => ok(
            &req.id,
            "success",
            Some(json!({ "specialties": specialties })),
        ),
        Err(e) => fail(&req.id, 500, e.to_string()),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "catalog.specialtiesWithGrades" => Some(handle_specialties_with_grades(state, req)),
        _ => None,
    }
}
