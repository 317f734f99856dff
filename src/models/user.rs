//! User lookup and credential checks

use std::sync::Arc;

use tracing::debug;

use crate::backend::Database;
use crate::error::{OrmError, OrmResult};
use crate::meta::ClassMeta;
use crate::record::Record;

pub struct User {
    record: Record,
}

impl User {
    /// Look a user up by their login column (the class find key)
    pub async fn by_login(
        db: &dyn Database,
        meta: Arc<ClassMeta>,
        login: &str,
    ) -> OrmResult<Option<Self>> {
        let login_column = meta
            .find_keys()
            .first()
            .cloned()
            .ok_or_else(|| OrmError::Query("user class declares no login column".to_string()))?;
        let mut record = Record::new(meta);
        record.set_member(&login_column, login);
        if record.find(db).await? {
            Ok(Some(Self { record }))
        } else {
            debug!(login, "no such user");
            Ok(None)
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.record.member_i64("id")
    }

    pub fn login(&self) -> String {
        let column = self
            .record
            .meta()
            .find_keys()
            .first()
            .cloned()
            .unwrap_or_default();
        self.record.member_str(&column).unwrap_or_default()
    }

    pub fn is_active(&self) -> bool {
        self.record.member_bool("is_active").unwrap_or(false)
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    /// Compare a candidate password hash against the stored one without
    /// short-circuiting on the first differing byte.
    pub fn authenticate(&self, password_hash: &str) -> bool {
        let Some(stored) = self.record.member_str("password_hash") else {
            return false;
        };
        if !self.is_active() {
            return false;
        }
        constant_time_eq(stored.as_bytes(), password_hash.as_bytes())
    }

    /// Fetch by login and check credentials in one step
    pub async fn authenticated(
        db: &dyn Database,
        meta: Arc<ClassMeta>,
        login: &str,
        password_hash: &str,
    ) -> OrmResult<Option<Self>> {
        match Self::by_login(db, meta, login).await? {
            Some(user) if user.authenticate(password_hash) => Ok(Some(user)),
            _ => Ok(None),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::user_class;
    use crate::testing::{row, MockDatabase};
    use crate::value::DbValue;

    fn user_row() -> crate::backend::SqlRow {
        row([
            ("id", DbValue::Int(1)),
            ("email", DbValue::Text("a@example.com".into())),
            ("password_hash", DbValue::Text("abc123".into())),
            ("is_active", DbValue::Bool(true)),
        ])
    }

    #[tokio::test]
    async fn lookup_uses_the_login_column() {
        let db = MockDatabase::new("default");
        db.push_fetch_rows(vec![user_row()]);
        let user = User::by_login(&db, Arc::new(user_class()), "a@example.com")
            .await
            .unwrap()
            .expect("found");
        assert_eq!(user.id(), Some(1));
        let sql = db.executed().pop().unwrap();
        assert!(sql.contains("X.email = $1"), "{sql}");
    }

    #[tokio::test]
    async fn authenticated_accepts_a_matching_hash() {
        let db = MockDatabase::new("default");
        db.push_fetch_rows(vec![user_row()]);
        let user = User::authenticated(&db, Arc::new(user_class()), "a@example.com", "abc123")
            .await
            .unwrap();
        assert!(user.is_some());
    }

    #[tokio::test]
    async fn authenticated_rejects_a_bad_hash() {
        let db = MockDatabase::new("default");
        db.push_fetch_rows(vec![user_row()]);
        let user = User::authenticated(&db, Arc::new(user_class()), "a@example.com", "abc124")
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[tokio::test]
    async fn inactive_users_never_authenticate() {
        let db = MockDatabase::new("default");
        db.push_fetch_rows(vec![row([
            ("id", DbValue::Int(1)),
            ("email", DbValue::Text("a@example.com".into())),
            ("password_hash", DbValue::Text("abc123".into())),
            ("is_active", DbValue::Bool(false)),
        ])]);
        let user = User::authenticated(&db, Arc::new(user_class()), "a@example.com", "abc123")
            .await
            .unwrap();
        assert!(user.is_none());
    }

    #[test]
    fn compare_is_length_sensitive() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"abc", b"abd"));
    }
}
