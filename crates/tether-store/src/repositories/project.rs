//! Project table access.

use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::errors::Result;
use crate::types::{Project, Provider};

/// Repository for the `projects` table.
pub struct ProjectRepo;

impl ProjectRepo {
    /// Insert or replace a project by id.
    pub fn upsert(conn: &Connection, project: &Project) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO projects (id, name, root_path, default_engine, opencode_attach_url) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(id) DO UPDATE SET \
               name = excluded.name, \
               root_path = excluded.root_path, \
               default_engine = excluded.default_engine, \
               opencode_attach_url = excluded.opencode_attach_url",
            params![
                project.id,
                project.name,
                project.root_path,
                project.default_engine.as_sql(),
                project.opencode_attach_url,
            ],
        )?;
        Ok(())
    }

    /// Get a project by id.
    pub fn get(conn: &Connection, id: &str) -> Result<Option<Project>> {
        conn.query_row(
            "SELECT id, name, root_path, default_engine, opencode_attach_url \
             FROM projects WHERE id = ?1",
            params![id],
            project_from_row,
        )
        .optional()
        .map_err(Into::into)
        .and_then(|opt| opt.transpose())
    }

    /// All projects ordered by name.
    pub fn list(conn: &Connection) -> Result<Vec<Project>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, root_path, default_engine, opencode_attach_url \
             FROM projects ORDER BY name",
        )?;
        let rows = stmt.query_map([], project_from_row)?;
        let mut projects = Vec::new();
        for row in rows {
            projects.push(row??);
        }
        Ok(projects)
    }

    /// Delete a project by id. Returns true if a row was deleted.
    pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
        let changed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// All project ids currently stored.
    pub fn ids(conn: &Connection) -> Result<Vec<String>> {
        let mut stmt = conn.prepare("SELECT id FROM projects")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .filter_map(std::result::Result::ok)
            .collect();
        Ok(ids)
    }
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Result<Project>> {
    let engine: String = row.get(3)?;
    Ok(Provider::parse(&engine).map(|default_engine| Project {
        id: row.get_unwrap(0),
        name: row.get_unwrap(1),
        root_path: row.get_unwrap(2),
        default_engine,
        opencode_attach_url: row.get_unwrap(4),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::test_support::setup_conn;

    fn sample(id: &str) -> Project {
        Project {
            id: id.into(),
            name: format!("Project {id}"),
            root_path: format!("/srv/{id}"),
            default_engine: Provider::Claude,
            opencode_attach_url: None,
        }
    }

    #[test]
    fn upsert_and_get() {
        let conn = setup_conn();
        ProjectRepo::upsert(&conn, &sample("alpha")).unwrap();
        let loaded = ProjectRepo::get(&conn, "alpha").unwrap().unwrap();
        assert_eq!(loaded.name, "Project alpha");
        assert_eq!(loaded.default_engine, Provider::Claude);
    }

    #[test]
    fn upsert_replaces() {
        let conn = setup_conn();
        ProjectRepo::upsert(&conn, &sample("alpha")).unwrap();
        let mut updated = sample("alpha");
        updated.default_engine = Provider::Opencode;
        updated.opencode_attach_url = Some("http://127.0.0.1:8787".into());
        ProjectRepo::upsert(&conn, &updated).unwrap();

        let loaded = ProjectRepo::get(&conn, "alpha").unwrap().unwrap();
        assert_eq!(loaded.default_engine, Provider::Opencode);
        assert_eq!(
            loaded.opencode_attach_url.as_deref(),
            Some("http://127.0.0.1:8787")
        );
        assert_eq!(ProjectRepo::list(&conn).unwrap().len(), 1);
    }

    #[test]
    fn list_ordered_by_name() {
        let conn = setup_conn();
        ProjectRepo::upsert(&conn, &sample("zeta")).unwrap();
        ProjectRepo::upsert(&conn, &sample("alpha")).unwrap();
        let list = ProjectRepo::list(&conn).unwrap();
        assert_eq!(list[0].id, "alpha");
        assert_eq!(list[1].id, "zeta");
    }

    #[test]
    fn delete_removes() {
        let conn = setup_conn();
        ProjectRepo::upsert(&conn, &sample("alpha")).unwrap();
        assert!(ProjectRepo::delete(&conn, "alpha").unwrap());
        assert!(!ProjectRepo::delete(&conn, "alpha").unwrap());
        assert!(ProjectRepo::get(&conn, "alpha").unwrap().is_none());
    }
}
