use crate::classify::GradeRules;
use crate::control_points::{LabeledPoint, is_reference_label};
use crate::error::{MobmapError, Result};
use crate::merge::{MergeReport, OwnedFields, merge};
use crate::models::{
    DropItem, MapCoords, MobRecord, Provenance, SourceCoords, StoreSummary, Visibility,
    VisibilityRow, validate_drop_order,
};
use crate::transform::{Fit, ProjectionPlan, plan_projection};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::{BTreeMap, BTreeSet, HashMap};

pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

/// Columns newer than the shared table layout. Added on open when missing.
const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("named_mobs", "map_lat", "REAL"),
    ("named_mobs", "map_lng", "REAL"),
    ("named_mobs", "coordinate_source", "TEXT"),
    ("named_mobs", "is_hidden", "INTEGER NOT NULL DEFAULT 0"),
    ("named_mobs", "special_drop_category", "TEXT"),
    ("named_mobs", "updated_at", "DATETIME"),
    ("named_mob_items", "drop_chance", "TEXT"),
];

/// A mob whose grade category changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryChange {
    pub name: String,
    pub level: Option<i64>,
    pub old: Option<String>,
    pub new: String,
}

impl Database {
    pub fn new(path: &std::path::Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| {
                conn.pragma_update(None, "foreign_keys", "ON")?;
                conn.busy_timeout(std::time::Duration::from_secs(5))?;
                Ok(())
            });
        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .map_err(MobmapError::Pool)?;

        let db = Self { pool };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(MobmapError::Pool)
    }

    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // Tables are shared with the map web app, which creates them in the same layout.
        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS named_mobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                slug TEXT UNIQUE,
                level INTEGER,
                level_range TEXT,
                respawn_time TEXT,
                respawn_minutes INTEGER,
                codex_url TEXT,
                location_x REAL,
                location_y REAL,
                location_z REAL,
                type TEXT DEFAULT 'named_mob',
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS named_mob_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                named_mob_id INTEGER NOT NULL,
                item_name TEXT NOT NULL,
                item_url TEXT,
                item_rarity TEXT,
                item_type TEXT,
                drop_order INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (named_mob_id) REFERENCES named_mobs(id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS markers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                label TEXT,
                lat REAL,
                lng REAL,
                startTime INTEGER,
                alarmAfter INTEGER,
                inGameCoord TEXT,
                type TEXT,
                state TEXT
            );
            "#,
        )?;

        for (table, column, decl) in ADDITIVE_COLUMNS {
            add_column_if_missing(&tx, table, column, decl)?;
        }

        tx.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_named_mob_items_mob_id ON named_mob_items(named_mob_id);",
        )?;
        create_unique_index_if_clean(&tx, "idx_named_mobs_name", "named_mobs", "name")?;
        create_unique_index_if_clean(&tx, "idx_named_mob_items_order", "named_mob_items", "named_mob_id, drop_order")?;

        tx.commit()?;
        Ok(())
    }

    /// Load every mob with its drops.
    pub fn load_mobs(&self) -> Result<Vec<MobRecord>> {
        let conn = self.connection()?;
        load_mobs_from(&conn)
    }

    /// Merge an incoming mob set into the store in a single transaction.
    ///
    /// With `dry_run` the transaction is rolled back after the merge, so the
    /// report shows what would have changed.
    pub fn import_mobs(
        &self,
        incoming: Vec<MobRecord>,
        owned: &OwnedFields,
        dry_run: bool,
    ) -> Result<MergeReport> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut local: BTreeMap<String, MobRecord> = BTreeMap::new();
        for mob in load_mobs_from(&tx)? {
            if let Some(shadowed) = local.insert(mob.name.clone(), mob) {
                tracing::warn!("Store holds {} more than once; merging into the later row only", shadowed.name);
            }
        }

        let report = merge(&mut local, incoming, owned)?;
        let now = chrono::Utc::now().to_rfc3339();

        let added: BTreeSet<&str> = report.added.iter().map(String::as_str).collect();
        for name in &added {
            insert_mob(&tx, &local[*name])?;
        }

        let items_changed = report.keys_with_changed_field("drop_items");
        for name in report.changed_keys() {
            if added.contains(name) {
                continue;
            }
            let mob = &local[name];
            let id = mob
                .id
                .ok_or_else(|| MobmapError::MissingField(format!("id of stored mob {}", name)))?;
            update_mob(&tx, id, mob, &now)?;
            if items_changed.contains(name) {
                replace_drop_items(&tx, id, &mob.name, &mob.drop_items)?;
            }
        }

        if dry_run {
            tx.rollback()?;
            tracing::info!("Dry run: rolled back import of {} added, {} changed", added.len(), report.change_count());
        } else {
            tx.commit()?;
        }

        Ok(report)
    }

    /// Markers whose label carries the reference tag, as control point candidates.
    pub fn reference_markers(&self, tag: &str) -> Result<Vec<LabeledPoint>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT label, lat, lng FROM markers
             WHERE label IS NOT NULL AND lat IS NOT NULL AND lng IS NOT NULL
             ORDER BY id",
        )?;

        let markers = stmt
            .query_map([], |row| {
                Ok(LabeledPoint {
                    label: row.get(0)?,
                    lat: row.get(1)?,
                    lng: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(markers
            .into_iter()
            .filter(|m| is_reference_label(&m.label, tag))
            .collect())
    }

    /// Project stored mobs through `fit` and write the new map coordinates.
    pub fn apply_fit(&self, fit: &Fit, overwrite_derived: bool, dry_run: bool) -> Result<ProjectionPlan> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mobs = load_mobs_from(&tx)?;
        let plan = plan_projection(fit, &mobs, overwrite_derived);
        let now = chrono::Utc::now().to_rfc3339();

        for update in &plan.updates {
            let id = update
                .id
                .ok_or_else(|| MobmapError::MissingField(format!("id of stored mob {}", update.name)))?;
            write_map_coords(&tx, id, &update.coords, &now)?;
        }

        if dry_run {
            tx.rollback()?;
        } else {
            tx.commit()?;
        }
        Ok(plan)
    }

    /// Place a mob on the map by hand. Returns the mob's name.
    pub fn set_manual_coords(&self, identifier: &str, lat: f64, lng: f64) -> Result<String> {
        let conn = self.connection()?;
        let (id, name) = find_mob_id(&conn, identifier)?;
        let coords = MapCoords {
            lat,
            lng,
            provenance: Provenance::Manual,
        };
        write_map_coords(&conn, id, &coords, &chrono::Utc::now().to_rfc3339())?;
        Ok(name)
    }

    pub fn list_visibility(&self, include_hidden: bool) -> Result<Vec<VisibilityRow>> {
        let conn = self.connection()?;
        let where_clause = if include_hidden { "" } else { "WHERE nm.is_hidden = 0" };
        let mut stmt = conn.prepare(&format!(
            "SELECT nm.id, nm.name, nm.level, nm.is_hidden, COUNT(nmi.id) AS item_count
             FROM named_mobs nm
             LEFT JOIN named_mob_items nmi ON nm.id = nmi.named_mob_id
             {}
             GROUP BY nm.id, nm.name, nm.level, nm.is_hidden
             ORDER BY nm.is_hidden, nm.name",
            where_clause
        ))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(VisibilityRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    level: row.get(2)?,
                    visibility: Visibility::from_hidden_flag(row.get(3)?),
                    item_count: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Hide or show one mob, by id or name. Returns the mob's name.
    pub fn set_visibility(&self, identifier: &str, visibility: Visibility) -> Result<String> {
        let conn = self.connection()?;
        let (id, name) = find_mob_id(&conn, identifier)?;
        conn.execute(
            "UPDATE named_mobs SET is_hidden = ? WHERE id = ?",
            params![visibility.is_hidden(), id],
        )?;
        Ok(name)
    }

    /// Hide every visible mob without special drops. Returns rows affected.
    pub fn hide_mobs_without_items(&self) -> Result<usize> {
        let conn = self.connection()?;
        let affected = conn.execute(
            "UPDATE named_mobs SET is_hidden = 1
             WHERE id NOT IN (SELECT DISTINCT named_mob_id FROM named_mob_items)
             AND is_hidden = 0",
            [],
        )?;
        Ok(affected)
    }

    /// Show every hidden mob that has special drops. Returns rows affected.
    pub fn show_mobs_with_items(&self) -> Result<usize> {
        let conn = self.connection()?;
        let affected = conn.execute(
            "UPDATE named_mobs SET is_hidden = 0
             WHERE id IN (SELECT DISTINCT named_mob_id FROM named_mob_items)
             AND is_hidden = 1",
            [],
        )?;
        Ok(affected)
    }

    /// Recompute `special_drop_category` from the highest drop rarity.
    pub fn recategorize(&self, rules: &GradeRules, dry_run: bool) -> Result<Vec<CategoryChange>> {
        let mut conn = self.connection()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut changes = Vec::new();
        for mob in load_mobs_from(&tx)? {
            let category = rules.category_for(&mob.drop_items);
            if mob.special_drop_category.as_deref() == Some(category.as_str()) {
                continue;
            }
            tx.execute(
                "UPDATE named_mobs SET special_drop_category = ? WHERE id = ?",
                params![category, mob.id],
            )?;
            changes.push(CategoryChange {
                name: mob.name,
                level: mob.level,
                old: mob.special_drop_category,
                new: category,
            });
        }

        if dry_run {
            tx.rollback()?;
        } else {
            tx.commit()?;
        }
        Ok(changes)
    }

    pub fn category_distribution(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT COALESCE(special_drop_category, '(none)'), COUNT(*)
             FROM named_mobs
             GROUP BY 1
             ORDER BY 1",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn summary(&self) -> Result<StoreSummary> {
        let conn = self.connection()?;
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(StoreSummary {
            mobs: count("SELECT COUNT(*) FROM named_mobs")?,
            with_items: count("SELECT COUNT(DISTINCT named_mob_id) FROM named_mob_items")?,
            with_map_coords: count(
                "SELECT COUNT(*) FROM named_mobs WHERE map_lat IS NOT NULL AND map_lng IS NOT NULL",
            )?,
            hidden: count("SELECT COUNT(*) FROM named_mobs WHERE is_hidden = 1")?,
        })
    }
}

fn add_column_if_missing(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if !columns.iter().any(|c| c == column) {
        conn.execute_batch(&format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl))?;
        tracing::info!("Added column {}.{}", table, column);
    }
    Ok(())
}

/// Create a unique index unless existing rows already violate it.
///
/// Stores written by older tooling can hold repeated drop orders; those stay
/// readable and the invariant is checked in code on every write instead.
fn create_unique_index_if_clean(conn: &Connection, index: &str, table: &str, columns: &str) -> Result<()> {
    let duplicates: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM (SELECT 1 FROM {} GROUP BY {} HAVING COUNT(*) > 1)",
            table, columns
        ),
        [],
        |row| row.get(0),
    )?;

    if duplicates > 0 {
        tracing::warn!(
            "Not creating unique index {}: {} duplicate ({}) groups in {}",
            index,
            duplicates,
            columns,
            table
        );
        return Ok(());
    }

    conn.execute_batch(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {}({})",
        index, table, columns
    ))?;
    Ok(())
}

fn escape_like(text: &str) -> String {
    text.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// Resolve an operator-supplied id or name to a single mob.
fn find_mob_id(conn: &Connection, identifier: &str) -> Result<(i64, String)> {
    if let Ok(id) = identifier.trim().parse::<i64>() {
        let name: Option<String> = conn
            .query_row("SELECT name FROM named_mobs WHERE id = ?", params![id], |row| row.get(0))
            .optional()?;
        return name
            .map(|name| (id, name))
            .ok_or_else(|| MobmapError::NotFound(format!("mob with id {}", id)));
    }

    let mut stmt =
        conn.prepare("SELECT id, name FROM named_mobs WHERE name LIKE ? ESCAPE '\\' ORDER BY name")?;
    let candidates = stmt
        .query_map(params![format!("%{}%", escape_like(identifier.trim()))], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if let Some(exact) = candidates
        .iter()
        .find(|(_, name)| name.eq_ignore_ascii_case(identifier.trim()))
    {
        return Ok(exact.clone());
    }

    match candidates.len() {
        0 => Err(MobmapError::NotFound(format!("mob '{}'", identifier))),
        1 => Ok(candidates[0].clone()),
        _ => Err(MobmapError::AmbiguousMatch {
            label: identifier.to_string(),
            candidates: candidates.into_iter().map(|(_, name)| name).collect(),
        }),
    }
}

fn load_mobs_from(conn: &Connection) -> Result<Vec<MobRecord>> {
    let mut items: HashMap<i64, Vec<DropItem>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT named_mob_id, item_name, item_url, item_rarity, item_type, drop_order, drop_chance
             FROM named_mob_items
             ORDER BY named_mob_id, drop_order",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                DropItem {
                    name: row.get(1)?,
                    url: row.get(2)?,
                    rarity: row.get(3)?,
                    item_type: row.get(4)?,
                    drop_order: row.get(5)?,
                    drop_chance: row.get(6)?,
                },
            ))
        })?;
        for row in rows {
            let (mob_id, item) = row?;
            items.entry(mob_id).or_default().push(item);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT id, name, slug, level, level_range, respawn_time, respawn_minutes, codex_url,
                location_x, location_y, location_z, map_lat, map_lng, coordinate_source,
                is_hidden, special_drop_category
         FROM named_mobs
         ORDER BY name",
    )?;

    let mobs = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let map_lat: Option<f64> = row.get(11)?;
            let map_lng: Option<f64> = row.get(12)?;
            let source: Option<String> = row.get(13)?;

            let map_coords = match (map_lat, map_lng) {
                (Some(lat), Some(lng)) => Some(MapCoords {
                    lat,
                    lng,
                    // Untagged positions are treated as hand-placed.
                    provenance: source.map(Provenance::from).unwrap_or(Provenance::Manual),
                }),
                _ => None,
            };

            Ok(MobRecord {
                id: Some(id),
                name: row.get(1)?,
                slug: row.get(2)?,
                level: row.get(3)?,
                level_range: row.get(4)?,
                respawn_time: row.get(5)?,
                respawn_minutes: row.get(6)?,
                url: row.get(7)?,
                location: SourceCoords {
                    x: row.get(8)?,
                    y: row.get(9)?,
                    z: row.get(10)?,
                },
                map_coords,
                visibility: Visibility::from_hidden_flag(row.get(14)?),
                special_drop_category: row.get(15)?,
                drop_items: Vec::new(),
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(mobs
        .into_iter()
        .map(|mut mob| {
            if let Some(id) = mob.id {
                mob.drop_items = items.remove(&id).unwrap_or_default();
            }
            mob
        })
        .collect())
}

fn insert_mob(conn: &Connection, mob: &MobRecord) -> Result<i64> {
    let (map_lat, map_lng, source) = match &mob.map_coords {
        Some(c) => (Some(c.lat), Some(c.lng), Some(c.provenance.as_str().to_string())),
        None => (None, None, None),
    };

    conn.execute(
        "INSERT INTO named_mobs (
            name, slug, level, level_range, respawn_time, respawn_minutes, codex_url,
            location_x, location_y, location_z, map_lat, map_lng, coordinate_source,
            is_hidden, special_drop_category, type
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 'named_mob')",
        params![
            mob.name,
            mob.slug,
            mob.level,
            mob.level_range,
            mob.respawn_time,
            mob.respawn_minutes,
            mob.url,
            mob.location.x,
            mob.location.y,
            mob.location.z,
            map_lat,
            map_lng,
            source,
            mob.visibility.is_hidden(),
            mob.special_drop_category,
        ],
    )?;
    let id = conn.last_insert_rowid();

    replace_drop_items(conn, id, &mob.name, &mob.drop_items)?;
    tracing::debug!("Inserted {} (id {}) with {} drops", mob.name, id, mob.drop_items.len());
    Ok(id)
}

/// Write the merge-managed columns of an existing mob.
fn update_mob(conn: &Connection, id: i64, mob: &MobRecord, now: &str) -> Result<()> {
    let (map_lat, map_lng, source) = match &mob.map_coords {
        Some(c) => (Some(c.lat), Some(c.lng), Some(c.provenance.as_str().to_string())),
        None => (None, None, None),
    };

    conn.execute(
        "UPDATE named_mobs SET
            slug = ?1, level = ?2, level_range = ?3, respawn_time = ?4, respawn_minutes = ?5,
            codex_url = ?6, location_x = ?7, location_y = ?8, location_z = ?9,
            map_lat = ?10, map_lng = ?11, coordinate_source = ?12, updated_at = ?13
         WHERE id = ?14",
        params![
            mob.slug,
            mob.level,
            mob.level_range,
            mob.respawn_time,
            mob.respawn_minutes,
            mob.url,
            mob.location.x,
            mob.location.y,
            mob.location.z,
            map_lat,
            map_lng,
            source,
            now,
            id,
        ],
    )?;
    Ok(())
}

fn replace_drop_items(conn: &Connection, mob_id: i64, mob_name: &str, items: &[DropItem]) -> Result<()> {
    validate_drop_order(mob_name, items)?;

    conn.execute("DELETE FROM named_mob_items WHERE named_mob_id = ?", params![mob_id])?;
    let mut stmt = conn.prepare(
        "INSERT INTO named_mob_items
            (named_mob_id, item_name, item_url, item_rarity, item_type, drop_order, drop_chance)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for item in items {
        stmt.execute(params![
            mob_id,
            item.name,
            item.url,
            item.rarity,
            item.item_type,
            item.drop_order,
            item.drop_chance,
        ])?;
    }
    Ok(())
}

fn write_map_coords(conn: &Connection, id: i64, coords: &MapCoords, now: &str) -> Result<()> {
    conn.execute(
        "UPDATE named_mobs SET map_lat = ?1, map_lng = ?2, coordinate_source = ?3, updated_at = ?4
         WHERE id = ?5",
        params![coords.lat, coords.lng, coords.provenance.as_str(), now, id],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{ControlPoint, estimate};
    use tempfile::TempDir;

    fn test_db() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("mydb.sqlite")).unwrap();
        (dir, db)
    }

    fn owned() -> OwnedFields {
        OwnedFields::for_record::<MobRecord, _>(&["map_coords", "drop_items"]).unwrap()
    }

    fn item(name: &str, rarity: &str, order: i32) -> DropItem {
        DropItem {
            name: name.to_string(),
            url: Some(format!("https://ashescodex.com/db/item/{}", name.replace(' ', "_"))),
            rarity: Some(rarity.to_string()),
            item_type: Some("Weapon".to_string()),
            drop_order: order,
            drop_chance: Some("12%".to_string()),
        }
    }

    fn feed_mob(name: &str, level: i64, location: (f64, f64), items: Vec<DropItem>) -> MobRecord {
        let mut mob = MobRecord::new(name);
        mob.slug = Some(name.to_lowercase().replace(' ', "-"));
        mob.level = Some(level);
        mob.respawn_time = Some("30-45 minutes".to_string());
        mob.respawn_minutes = Some(30);
        mob.location = SourceCoords::new(location.0, location.1, Some(100.0));
        mob.drop_items = items;
        mob
    }

    fn by_name(db: &Database, name: &str) -> MobRecord {
        db.load_mobs()
            .unwrap()
            .into_iter()
            .find(|m| m.name == name)
            .unwrap()
    }

    #[test]
    fn test_migrations_are_rerunnable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mydb.sqlite");
        Database::new(&path).unwrap();
        let db = Database::new(&path).unwrap();
        assert_eq!(db.summary().unwrap(), StoreSummary::default());
    }

    #[test]
    fn test_legacy_table_gains_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mydb.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE named_mobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    slug TEXT UNIQUE,
                    level INTEGER,
                    level_range TEXT,
                    respawn_time TEXT,
                    respawn_minutes INTEGER,
                    codex_url TEXT,
                    location_x REAL,
                    location_y REAL,
                    location_z REAL,
                    type TEXT DEFAULT 'named_mob',
                    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
                );
                INSERT INTO named_mobs (name, level, location_x, location_y) VALUES ('Wormwig', 12, 1.0, 2.0);",
            )
            .unwrap();
        }

        let db = Database::new(&path).unwrap();
        let mobs = db.load_mobs().unwrap();
        assert_eq!(mobs.len(), 1);
        assert_eq!(mobs[0].visibility, Visibility::Visible);
        assert!(mobs[0].map_coords.is_none());
    }

    #[test]
    fn test_legacy_duplicates_still_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mydb.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE named_mobs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    slug TEXT UNIQUE,
                    level INTEGER,
                    level_range TEXT,
                    respawn_time TEXT,
                    respawn_minutes INTEGER,
                    codex_url TEXT,
                    location_x REAL,
                    location_y REAL,
                    location_z REAL,
                    type TEXT DEFAULT 'named_mob',
                    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
                );
                CREATE TABLE named_mob_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    named_mob_id INTEGER NOT NULL,
                    item_name TEXT NOT NULL,
                    item_url TEXT,
                    item_rarity TEXT,
                    item_type TEXT,
                    drop_order INTEGER NOT NULL DEFAULT 0,
                    FOREIGN KEY (named_mob_id) REFERENCES named_mobs(id) ON DELETE CASCADE
                );
                INSERT INTO named_mobs (name, level) VALUES ('Wormwig', 12);
                INSERT INTO named_mobs (name, level) VALUES ('Wormwig', 13);
                INSERT INTO named_mob_items (named_mob_id, item_name, drop_order) VALUES (1, 'Worm Ring', 1);
                INSERT INTO named_mob_items (named_mob_id, item_name, drop_order) VALUES (1, 'Worm Cloak', 1);",
            )
            .unwrap();
        }

        let db = Database::new(&path).unwrap();
        assert_eq!(db.summary().unwrap().mobs, 2);
        assert_eq!(db.list_visibility(true).unwrap().len(), 2);

        let mobs = db.load_mobs().unwrap();
        let items: usize = mobs.iter().map(|m| m.drop_items.len()).sum();
        assert_eq!(items, 2);

        // Rewriting items still enforces unique drop orders.
        let mut fresh = feed_mob("Ysshokk", 30, (0.0, 0.0), vec![]);
        fresh.drop_items = vec![item("A", "Rare", 1), item("B", "Rare", 1)];
        let result = db.import_mobs(vec![fresh], &owned(), false);
        assert!(matches!(result, Err(MobmapError::DuplicateEntry(_))));
    }

    #[test]
    fn test_like_wildcards_in_target_are_literal() {
        let (_dir, db) = test_db();
        db.import_mobs(
            vec![
                feed_mob("Wormwig", 12, (0.0, 0.0), vec![]),
                feed_mob("Ysshokk", 30, (0.0, 0.0), vec![]),
            ],
            &owned(),
            false,
        )
        .unwrap();

        assert!(matches!(
            db.set_visibility("%", Visibility::Hidden),
            Err(MobmapError::NotFound(_))
        ));
        assert!(matches!(
            db.set_visibility("W_rmwig", Visibility::Hidden),
            Err(MobmapError::NotFound(_))
        ));
        assert_eq!(db.summary().unwrap().hidden, 0);
    }

    #[test]
    fn test_import_round_trip_and_idempotence() {
        let (_dir, db) = test_db();
        let incoming = vec![
            feed_mob("Forgelord Zammer", 25, (-123456.789, 654321.123), vec![
                item("Ancient Dunzen Longsword", "Uncommon", 1),
                item("Forgelord Signet", "Uncommon", 2),
            ]),
            feed_mob("Chief Armorer Jannus", 20, (-987654.321, 123456.789), vec![]),
        ];

        let first = db.import_mobs(incoming.clone(), &owned(), false).unwrap();
        assert_eq!(first.added.len(), 2);

        let zammer = by_name(&db, "Forgelord Zammer");
        assert!(zammer.id.is_some());
        assert_eq!(zammer.level, Some(25));
        assert_eq!(zammer.location, SourceCoords::new(-123456.789, 654321.123, Some(100.0)));
        assert_eq!(zammer.drop_items, incoming[0].drop_items);

        let snapshot = db.load_mobs().unwrap();
        let second = db.import_mobs(incoming, &owned(), false).unwrap();
        assert!(!second.has_changes(), "second import reported {:?}", second);
        assert_eq!(db.load_mobs().unwrap(), snapshot);
    }

    #[test]
    fn test_import_updates_non_owned_and_keeps_owned() {
        let (_dir, db) = test_db();
        db.import_mobs(
            vec![feed_mob("Forgelord Zammer", 20, (1.0, 2.0), vec![item("Curated Blade", "Rare", 1)])],
            &owned(),
            false,
        )
        .unwrap();
        db.set_manual_coords("Forgelord Zammer", -235.6, 137.4).unwrap();

        let mut updated = feed_mob("Forgelord Zammer", 25, (1.0, 2.0), vec![item("Scraped Blade", "Common", 1)]);
        updated.respawn_time = Some("25-35 minutes".to_string());
        let report = db
            .import_mobs(vec![updated, feed_mob("Magnus", 50, (5.0, 5.0), vec![])], &owned(), false)
            .unwrap();

        assert_eq!(report.added, vec!["Magnus".to_string()]);
        assert_eq!(report.field_changed["level"].len(), 1);
        assert_eq!(report.field_changed["respawn_time"].len(), 1);
        assert!(!report.field_changed.contains_key("drop_items"));
        assert_eq!(report.preserved.len(), 1);

        let zammer = by_name(&db, "Forgelord Zammer");
        assert_eq!(zammer.level, Some(25));
        assert_eq!(zammer.respawn_time.as_deref(), Some("25-35 minutes"));
        assert_eq!(zammer.drop_items[0].name, "Curated Blade");
        let coords = zammer.map_coords.unwrap();
        assert_eq!((coords.lat, coords.lng), (-235.6, 137.4));
        assert_eq!(coords.provenance, Provenance::Manual);
    }

    #[test]
    fn test_missing_upstream_stays_in_store() {
        let (_dir, db) = test_db();
        db.import_mobs(vec![feed_mob("Gone", 1, (0.0, 0.0), vec![])], &owned(), false)
            .unwrap();

        let report = db.import_mobs(vec![], &owned(), false).unwrap();

        assert_eq!(report.missing_upstream, vec!["Gone".to_string()]);
        assert_eq!(db.summary().unwrap().mobs, 1);
    }

    #[test]
    fn test_dry_run_import_rolls_back() {
        let (_dir, db) = test_db();
        let report = db
            .import_mobs(vec![feed_mob("Wormwig", 12, (1.0, 2.0), vec![])], &owned(), true)
            .unwrap();

        assert_eq!(report.added, vec!["Wormwig".to_string()]);
        assert!(db.load_mobs().unwrap().is_empty());
    }

    #[test]
    fn test_failed_import_writes_nothing() {
        let (_dir, db) = test_db();
        let mut broken = feed_mob("Broken", 1, (0.0, 0.0), vec![]);
        broken.drop_items = vec![item("A", "Rare", 1), item("B", "Rare", 1)];

        let result = db.import_mobs(
            vec![feed_mob("Fine", 1, (0.0, 0.0), vec![]), broken],
            &owned(),
            false,
        );

        assert!(matches!(result, Err(MobmapError::DuplicateEntry(_))));
        assert!(db.load_mobs().unwrap().is_empty());
    }

    #[test]
    fn test_reference_markers_are_filtered_by_tag() {
        let (_dir, db) = test_db();
        {
            let conn = db.connection().unwrap();
            conn.execute_batch(
                "INSERT INTO markers (label, lat, lng) VALUES ('REF Wormwig', -235.6, 137.4);
                 INSERT INTO markers (label, lat, lng) VALUES ('Ysshokk REF', -239.0, 144.375);
                 INSERT INTO markers (label, lat, lng) VALUES ('Iron Vein', -1.0, 1.0);
                 INSERT INTO markers (label, lat, lng) VALUES ('REF Unplaced', NULL, NULL);",
            )
            .unwrap();
        }

        let markers = db.reference_markers("REF").unwrap();
        let labels: Vec<&str> = markers.iter().map(|m| m.label.as_str()).collect();
        assert_eq!(labels, vec!["REF Wormwig", "Ysshokk REF"]);
    }

    #[test]
    fn test_apply_fit_fills_missing_coordinates_only() {
        let (_dir, db) = test_db();
        db.import_mobs(
            vec![
                feed_mob("Wormwig", 12, (100.0, 200.0), vec![]),
                feed_mob("Ysshokk", 30, (300.0, 400.0), vec![]),
            ],
            &owned(),
            false,
        )
        .unwrap();
        db.set_manual_coords("Ysshokk", 9.0, 9.0).unwrap();

        let fit = estimate(&[
            ControlPoint::new(0.0, 0.0, 0.0, 0.0),
            ControlPoint::new(10.0, 10.0, 1.0, 2.0),
        ])
        .unwrap();

        let dry = db.apply_fit(&fit, false, true).unwrap();
        assert_eq!(dry.updates.len(), 1);
        assert!(by_name(&db, "Wormwig").map_coords.is_none());

        let plan = db.apply_fit(&fit, false, false).unwrap();
        assert_eq!(plan.kept, vec!["Ysshokk".to_string()]);

        let wormwig = by_name(&db, "Wormwig").map_coords.unwrap();
        assert!((wormwig.lat - 10.0).abs() < 1e-9);
        assert!((wormwig.lng - 40.0).abs() < 1e-9);
        assert_eq!(wormwig.provenance, Provenance::ScaleOffset);

        let ysshokk = by_name(&db, "Ysshokk").map_coords.unwrap();
        assert_eq!((ysshokk.lat, ysshokk.lng), (9.0, 9.0));
    }

    #[test]
    fn test_visibility_transitions() {
        let (_dir, db) = test_db();
        db.import_mobs(
            vec![
                feed_mob("Bloodmage Triune", 20, (0.0, 0.0), vec![item("Blood Staff", "Rare", 1)]),
                feed_mob("Bloodmage Acolyte", 10, (0.0, 0.0), vec![]),
                feed_mob("Crunch Trunk", 15, (0.0, 0.0), vec![]),
            ],
            &owned(),
            false,
        )
        .unwrap();

        assert_eq!(db.hide_mobs_without_items().unwrap(), 2);
        assert_eq!(db.hide_mobs_without_items().unwrap(), 0);
        assert_eq!(db.list_visibility(false).unwrap().len(), 1);
        assert_eq!(db.list_visibility(true).unwrap().len(), 3);

        assert_eq!(db.set_visibility("Crunch", Visibility::Visible).unwrap(), "Crunch Trunk");
        assert_eq!(by_name(&db, "Crunch Trunk").visibility, Visibility::Visible);

        let err = db.set_visibility("Bloodmage", Visibility::Hidden).unwrap_err();
        assert!(matches!(err, MobmapError::AmbiguousMatch { .. }));

        let triune = by_name(&db, "Bloodmage Triune");
        db.set_visibility(&triune.id.unwrap().to_string(), Visibility::Hidden).unwrap();
        assert_eq!(db.show_mobs_with_items().unwrap(), 1);

        assert!(matches!(
            db.set_visibility("Nobody", Visibility::Hidden),
            Err(MobmapError::NotFound(_))
        ));
    }

    #[test]
    fn test_visibility_survives_import() {
        let (_dir, db) = test_db();
        let incoming = vec![feed_mob("Crunch Trunk", 15, (0.0, 0.0), vec![])];
        db.import_mobs(incoming.clone(), &owned(), false).unwrap();
        db.set_visibility("Crunch Trunk", Visibility::Hidden).unwrap();

        let mut changed = incoming;
        changed[0].level = Some(16);
        db.import_mobs(changed, &owned(), false).unwrap();

        let trunk = by_name(&db, "Crunch Trunk");
        assert_eq!(trunk.level, Some(16));
        assert_eq!(trunk.visibility, Visibility::Hidden);
    }

    #[test]
    fn test_recategorize_and_distribution() {
        let (_dir, db) = test_db();
        db.import_mobs(
            vec![
                feed_mob("Wormwig", 12, (0.0, 0.0), vec![item("Worm Ring", "Common", 1)]),
                feed_mob("Magnus", 50, (0.0, 0.0), vec![item("Greatsword", "Epic", 1), item("Core", "Rare", 2)]),
                feed_mob("Crunch Trunk", 15, (0.0, 0.0), vec![]),
            ],
            &owned(),
            false,
        )
        .unwrap();

        let rules = GradeRules::default();
        let changes = db.recategorize(&rules, false).unwrap();
        assert_eq!(changes.len(), 3);
        assert!(db.recategorize(&rules, false).unwrap().is_empty());

        assert_eq!(by_name(&db, "Magnus").special_drop_category.as_deref(), Some("radiant"));
        let distribution = db.category_distribution().unwrap();
        assert_eq!(
            distribution,
            vec![
                ("initiate".to_string(), 1),
                ("noSpecialDrop".to_string(), 1),
                ("radiant".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_summary_counts() {
        let (_dir, db) = test_db();
        db.import_mobs(
            vec![
                feed_mob("Wormwig", 12, (0.0, 0.0), vec![item("Worm Ring", "Common", 1)]),
                feed_mob("Ysshokk", 30, (0.0, 0.0), vec![]),
            ],
            &owned(),
            false,
        )
        .unwrap();
        db.set_manual_coords("Ysshokk", 1.0, 2.0).unwrap();
        db.set_visibility("Wormwig", Visibility::Hidden).unwrap();

        assert_eq!(
            db.summary().unwrap(),
            StoreSummary { mobs: 2, with_items: 1, with_map_coords: 1, hidden: 1 }
        );
    }
}
