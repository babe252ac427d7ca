use crate::define_simple_storage;
use crate::models::User;
use crate::storage::simple_storage::SimpleStorage;
use anyhow::Result;
use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

define_simple_storage! {
    pub struct UserStorage { table: "users" }
}

const EMAIL_INDEX: TableDefinition<&str, &str> = TableDefinition::new("users_by_email");

impl UserStorage {
    fn ensure_index(&self) -> Result<()> {
        let write_txn = self.db().begin_write()?;
        write_txn.open_table(EMAIL_INDEX)?;
        write_txn.commit()?;
        Ok(())
    }

    pub fn insert(&self, user: &User) -> Result<()> {
        self.ensure_index()?;
        let write_txn = self.db().begin_write()?;
        {
            let mut table = write_txn.open_table(<Self as SimpleStorage>::TABLE)?;
            let mut index = write_txn.open_table(EMAIL_INDEX)?;
            if index.get(user.email.as_str())?.is_some() {
                anyhow::bail!("email already registered");
            }
            table.insert(user.id.to_string().as_str(), serde_json::to_vec(user)?.as_slice())?;
            index.insert(user.email.as_str(), user.id.to_string().as_str())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self
            .get_raw(&id.to_string())?
            .map(|bytes| serde_json::from_slice(&bytes))
            .transpose()?)
    }

    pub fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        self.ensure_index()?;
        let read_txn = self.db().begin_read()?;
        let index = read_txn.open_table(EMAIL_INDEX)?;
        let Some(id) = index.get(email)?.map(|v| v.value().to_string()) else {
            return Ok(None);
        };
        drop(index);
        drop(read_txn);
        self.get(Uuid::parse_str(&id)?)
    }

    pub fn update(&self, user: &User) -> Result<()> {
        self.put_raw(&user.id.to_string(), serde_json::to_vec(user)?.as_slice())
    }
}
