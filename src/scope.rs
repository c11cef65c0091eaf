use rusqlite::Connection;

/// The closed set of roles. Wire strings are the snake_case forms the rest of
/// the system (and the stored `users.role` column) uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    SuperAdmin,
    KepalaCabdin,
    KepalaBidang,
    PengawasBina,
    PengawasSekolah,
    AdminGrup,
    Guru,
    KepalaSekolah,
}

impl Role {
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "super_admin" => Some(Role::SuperAdmin),
            "kepala_cabdin" => Some(Role::KepalaCabdin),
            "kepala_bidang" => Some(Role::KepalaBidang),
            "pengawas_bina" => Some(Role::PengawasBina),
            "pengawas_sekolah" => Some(Role::PengawasSekolah),
            "admin_grup" => Some(Role::AdminGrup),
            "guru" => Some(Role::Guru),
            "kepala_sekolah" => Some(Role::KepalaSekolah),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::KepalaCabdin => "kepala_cabdin",
            Role::KepalaBidang => "kepala_bidang",
            Role::PengawasBina => "pengawas_bina",
            Role::PengawasSekolah => "pengawas_sekolah",
            Role::AdminGrup => "admin_grup",
            Role::Guru => "guru",
            Role::KepalaSekolah => "kepala_sekolah",
        }
    }

    /// Roles allowed to hold school supervision assignments and file reports.
    pub fn is_supervisory(self) -> bool {
        matches!(
            self,
            Role::PengawasSekolah | Role::PengawasBina | Role::KepalaBidang
        )
    }
}

/// A resolved identity: the fields scope resolution depends on.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: String,
    pub role: Role,
    pub region_id: Option<String>,
    pub school_id: Option<String>,
}

/// The subset of rows an identity may read or aggregate over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Region(String),
    School(String),
    /// Membership groups in insertion order. Count queries use only the
    /// first entry; listing views use the whole set (see DESIGN.md).
    Groups(Vec<String>),
}

impl Scope {
    pub fn first_group(&self) -> Option<&str> {
        match self {
            Scope::Groups(ids) => ids.first().map(|s| s.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    /// A regional-leadership identity with no region affiliation.
    MissingRegion,
    /// A school-level supervisory identity with no school affiliation.
    MissingSchool,
}

/// Pure resolution table over the role variants. `memberships` is the
/// identity's group ids in membership insertion order; only the member-side
/// roles consume it.
pub fn resolve_scope(identity: &Identity, memberships: &[String]) -> Result<Scope, ScopeError> {
    match identity.role {
        Role::SuperAdmin => Ok(Scope::All),
        Role::KepalaCabdin | Role::KepalaBidang | Role::PengawasBina => identity
            .region_id
            .clone()
            .map(Scope::Region)
            .ok_or(ScopeError::MissingRegion),
        Role::PengawasSekolah => identity
            .school_id
            .clone()
            .map(Scope::School)
            .ok_or(ScopeError::MissingSchool),
        Role::AdminGrup | Role::Guru | Role::KepalaSekolah => {
            Ok(Scope::Groups(memberships.to_vec()))
        }
    }
}

/// Membership group ids for a user, in insertion order.
pub fn membership_group_ids(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT group_id FROM group_members WHERE user_id = ? ORDER BY rowid",
    )?;
    let rows = stmt.query_map([user_id], |r| r.get::<_, String>(0))?;
    rows.collect()
}

/// Loads the scope-relevant slice of a user row. `Ok(None)` when the id does
/// not resolve (callers map this to their not-found taxonomy).
pub fn load_identity(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<Identity>> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT id, role, region_id, school_id FROM users WHERE id = ?",
        [user_id],
        |r| {
            let role_str: String = r.get(1)?;
            Ok((
                r.get::<_, String>(0)?,
                role_str,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        },
    )
    .optional()
    .map(|row| {
        row.and_then(|(id, role_str, region_id, school_id)| {
            Role::parse(&role_str).map(|role| Identity {
                id,
                role,
                region_id,
                school_id,
            })
        })
    })
}
