use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use cli_table::{Cell, CellStruct, Style, Table, format::Justify, print_stdout};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::repo::ServerDetails;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS servers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    alias TEXT UNIQUE NOT NULL,
    url TEXT NOT NULL,
    user TEXT,
    password TEXT,
    access_token TEXT,
    last_used TEXT
)";

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct ServerCollection {
    hosts: BTreeMap<String, Server>,
}

impl ServerCollection {
    pub fn read_from_storage<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("cannot open server database {}", path.display()))?;
        conn.execute(SCHEMA, []).context("cannot create servers table")?;

        let mut stmt = conn
            .prepare("SELECT id, alias, url, user, password, access_token, last_used FROM servers")
            .context("cannot prepare server query")?;
        let rows = stmt.query_map([], |row| {
            let alias: String = row.get(1)?;
            let s = Server {
                id: Some(row.get(0)?),
                alias: Some(alias.clone()),
                url: row.get(2)?,
                user: row.get(3)?,
                password: row.get(4)?,
                access_token: row.get(5)?,
                last_used: row.get(6)?,
            };
            Ok((alias, s))
        })?;

        let mut hosts = BTreeMap::new();
        for row in rows {
            let (alias, server) = row.context("cannot read server row")?;
            hosts.insert(alias, server);
        }
        Ok(ServerCollection { hosts })
    }

    pub fn save_to_storage<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let mut conn = Connection::open(path)
            .with_context(|| format!("cannot open server database {}", path.display()))?;
        conn.execute(SCHEMA, []).context("cannot create servers table")?;

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM servers", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO servers (alias, url, user, password, access_token, last_used)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (alias, server) in &self.hosts {
                stmt.execute(params![
                    alias,
                    server.url,
                    server.user,
                    server.password,
                    server.access_token,
                    server.last_used,
                ])?;
            }
        }
        tx.commit().context("cannot save servers")?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Server> {
        self.hosts.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Server> {
        self.hosts.get_mut(key)
    }

    pub fn insert(&mut self, key: &str, mut server: Server) -> &mut Self {
        if server.alias.is_none() {
            server.alias = Some(key.to_string());
        }
        self.hosts.insert(key.to_owned(), server);
        self
    }

    pub fn remove(&mut self, key: &str) -> &mut Self {
        self.hosts.remove(key);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn hosts(&self) -> &BTreeMap<String, Server> {
        &self.hosts
    }

    pub fn show_table(&self, default_alias: Option<&str>) -> Result<()> {
        if self.is_empty() {
            println!("No servers configured. Add one with: ap config add <alias> <url>");
            return Ok(());
        }
        let title = vec![
            "Alias".cell().bold(true),
            "URL".cell().bold(true),
            "User".cell().bold(true),
            "Auth".cell().bold(true),
            "Last Used".cell().bold(true),
        ];
        let mut table: Vec<Vec<CellStruct>> = Vec::new();
        for (alias, server) in &self.hosts {
            let shown = if Some(alias.as_str()) == default_alias {
                format!("{} *", alias)
            } else {
                alias.clone()
            };
            table.push(vec![
                shown.cell(),
                server.url.clone().cell(),
                server.user.clone().unwrap_or_default().cell().justify(Justify::Right),
                server.auth_kind().cell().justify(Justify::Right),
                server.get_last_used_display().cell().justify(Justify::Right),
            ]);
        }
        print_stdout(table.table().title(title)).context("cannot print server table")?;
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Server {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub alias: Option<String>,
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub last_used: Option<String>,
}

impl Server {
    pub fn details(&self) -> ServerDetails {
        ServerDetails {
            url: self.url.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            access_token: self.access_token.clone(),
        }
    }

    pub fn auth_kind(&self) -> &'static str {
        if self.access_token.is_some() {
            "token"
        } else if self.password.is_some() {
            "password"
        } else {
            "none"
        }
    }

    pub fn get_last_used_display(&self) -> String {
        match &self.last_used {
            Some(ts) if !ts.is_empty() => match ts.parse::<i64>() {
                Ok(secs) => match chrono::DateTime::from_timestamp(secs, 0) {
                    Some(dt) => {
                        dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string()
                    }
                    None => "Invalid timestamp".to_string(),
                },
                Err(_) => ts.clone(),
            },
            _ => "Never".to_string(),
        }
    }

    pub fn set_last_used_now(&mut self) {
        self.last_used = Some(chrono::Local::now().timestamp().to_string());
    }
}
