//! Scripted Actor Bridge: binds a per-actor mailbox to a leased VM and
//! marshals request/reply across the Lua boundary with a stable wire
//! shape.
//!
//! Grounded in full on `original_source/src/actor/lua_actor.cpp`: the VM
//! is acquired once and held for the actor's whole lifetime, the prelude
//! installs `create_message`/`create_response`/a default echoing
//! `on_message`, script errors are wrapped as `"Lua error: " + message`,
//! and `send_message` is supplemented into a real call against the
//! runtime (the original leaves it as a logging stub) — see DESIGN.md
//! Open Question decisions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use mlua::{Lua, Value as LuaValue};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::actor::runtime::DistributedRuntime;
use crate::error::{Error, Result};
use crate::vmpool::{Lease, VmPool};

const PRELUDE: &str = r#"
function create_message(msg_type, data, sender)
    sender = sender or "gateway"
    return { type = msg_type, sender_id = sender, data = data or {} }
end

function create_response(success, data, error_message)
    return { success = success, data = data or {}, error_message = error_message or "" }
end

function on_message(msg)
    return create_response(true, msg.data, "")
end
"#;

#[derive(Debug, serde::Serialize)]
pub struct ScriptReply {
    pub success: bool,
    pub error_message: String,
    pub data: HashMap<String, String>,
}

impl ScriptReply {
    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
            data: HashMap::new(),
        }
    }

    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"success":false,"error_message":"failed to serialize reply","data":{}}"#.to_string()
        })
    }
}

pub struct ScriptedActorBridge {
    actor_id: String,
    script_path: String,
    lease: Lease,
    runtime: Arc<DistributedRuntime>,
}

impl ScriptedActorBridge {
    /// Acquires a VM from `pool` and holds it for this bridge's lifetime,
    /// installs the scripting prelude and runtime capabilities, loads
    /// `script_path`, and invokes `on_init` if the script defines one.
    pub async fn new(
        pool: &VmPool,
        runtime: Arc<DistributedRuntime>,
        script_path: impl Into<String>,
        actor_id: Option<String>,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let script_path = script_path.into();
        let actor_id = actor_id.unwrap_or_else(|| format!("actor_{}", Uuid::new_v4()));

        let lease = pool
            .acquire(acquire_timeout)
            .await
            .ok_or(Error::PoolExhausted {
                waited_ms: acquire_timeout.as_millis() as u64,
            })?;

        let bridge = Self {
            actor_id,
            script_path,
            lease,
            runtime,
        };
        bridge.setup_lua_environment()?;
        bridge.register_host_functions()?;
        bridge.load_script()?;
        bridge.invoke_on_init().await;
        Ok(bridge)
    }

    fn lua(&self) -> &Lua {
        self.lease.lua()
    }

    fn setup_lua_environment(&self) -> Result<()> {
        let lua = self.lua();
        lua.globals().set("actor_id", self.actor_id.clone())?;
        lua.globals().set("script_path", self.script_path.clone())?;
        lua.load(PRELUDE).set_name("prelude").exec()?;
        Ok(())
    }

    fn register_host_functions(&self) -> Result<()> {
        let lua = self.lua();
        let actor_id = self.actor_id.clone();

        let log_info_id = actor_id.clone();
        let log_info = lua.create_function(move |_, msg: String| {
            info!("[{log_info_id}] {msg}");
            Ok(())
        })?;
        lua.globals().set("log_info", log_info)?;

        let log_error_id = actor_id.clone();
        let log_error = lua.create_function(move |_, msg: String| {
            error!("[{log_error_id}] {msg}");
            Ok(())
        })?;
        lua.globals().set("log_error", log_error)?;

        let get_current_time = lua.create_function(|_, ()| {
            let millis = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as i64)
                .unwrap_or(0);
            Ok(millis)
        })?;
        lua.globals().set("get_current_time", get_current_time)?;

        let get_actor_id_id = actor_id.clone();
        let get_actor_id = lua.create_function(move |_, ()| Ok(get_actor_id_id.clone()))?;
        lua.globals().set("get_actor_id", get_actor_id)?;

        let runtime = self.runtime.clone();
        let send_message = lua.create_async_function(
            move |_, (target, msg_type, data): (String, String, Option<mlua::Table>)| {
                let runtime = runtime.clone();
                async move {
                    let payload = match data {
                        Some(t) => lua_table_to_json(&t),
                        None => JsonValue::Object(Default::default()),
                    };
                    let delivered = runtime.send_to(&target, msg_type, payload).await;
                    Ok(delivered)
                }
            },
        )?;
        lua.globals().set("send_message", send_message)?;

        Ok(())
    }

    fn load_script(&self) -> Result<()> {
        if !std::path::Path::new(&self.script_path).exists() {
            return Err(Error::Script(format!(
                "script file not found: {}",
                self.script_path
            )));
        }
        let source = std::fs::read_to_string(&self.script_path)?;
        self.lua()
            .load(&source)
            .set_name(&self.script_path)
            .exec()?;
        Ok(())
    }

    async fn invoke_on_init(&self) {
        let on_init: Option<mlua::Function> = self.lua().globals().get("on_init").ok();
        match on_init {
            Some(f) => {
                if let Err(e) = f.call_async::<()>(()).await {
                    error!("[{}] on_init raised: {e}", self.actor_id);
                }
            }
            None => debug!("[{}] script defines no on_init (optional)", self.actor_id),
        }
    }

    /// Parses `payload_json` (JSON or empty), invokes the script's
    /// `on_message`, and marshals its return value into the reply shape.
    /// Never returns an `Err` — every failure mode becomes
    /// `{success:false, error_message, data:{}}`.
    pub async fn dispatch(&self, msg_type: &str, payload_json: &str) -> ScriptReply {
        let data: JsonValue = if payload_json.trim().is_empty() {
            JsonValue::Object(Default::default())
        } else {
            match serde_json::from_str(payload_json) {
                Ok(v) => v,
                Err(e) => return ScriptReply::error(format!("invalid payload json: {e}")),
            }
        };

        let lua = self.lua();
        let msg_table = match lua.create_table() {
            Ok(t) => t,
            Err(e) => return ScriptReply::error(format!("Lua error: {e}")),
        };
        if msg_table.set("type", msg_type).is_err()
            || msg_table.set("sender_id", "gateway").is_err()
        {
            return ScriptReply::error("Lua error: failed to build message table".to_string());
        }
        let data_value = match json_to_lua(lua, &data) {
            Ok(v) => v,
            Err(e) => return ScriptReply::error(format!("Lua error: {e}")),
        };
        if msg_table.set("data", data_value).is_err() {
            return ScriptReply::error("Lua error: failed to attach message data".to_string());
        }

        let on_message: mlua::Function = match lua.globals().get("on_message") {
            Ok(f) => f,
            Err(e) => return ScriptReply::error(format!("Lua error: {e}")),
        };

        match on_message.call_async::<LuaValue>(msg_table).await {
            Ok(result) => lua_response_to_reply(result),
            Err(e) => ScriptReply::error(format!("Lua error: {e}")),
        }
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }
}

fn lua_response_to_reply(value: LuaValue) -> ScriptReply {
    let table = match value {
        LuaValue::Table(t) => t,
        _ => return ScriptReply::error("on_message did not return a table".to_string()),
    };

    let success: bool = table.get("success").unwrap_or(true);
    let error_message: String = table.get("error_message").unwrap_or_default();
    let data: HashMap<String, String> = match table.get::<mlua::Table>("data") {
        Ok(t) => lua_table_to_string_map(&t),
        Err(_) => HashMap::new(),
    };

    ScriptReply {
        success,
        error_message,
        data,
    }
}

fn lua_table_to_string_map(table: &mlua::Table) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in table.clone().pairs::<mlua::Value, mlua::Value>() {
        let Ok((k, v)) = pair else { continue };
        let key = match k {
            LuaValue::String(s) => s.to_str().map(|s| s.to_string()).unwrap_or_default(),
            LuaValue::Integer(i) => i.to_string(),
            LuaValue::Number(n) => n.to_string(),
            _ => continue,
        };
        let value = lua_value_to_display_string(&v);
        out.insert(key, value);
    }
    out
}

fn lua_value_to_display_string(value: &LuaValue) -> String {
    match value {
        LuaValue::String(s) => s.to_str().map(|s| s.to_string()).unwrap_or_default(),
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Number(n) => n.to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        LuaValue::Nil => String::new(),
        _ => String::new(),
    }
}

fn lua_table_to_json(table: &mlua::Table) -> JsonValue {
    let is_array = {
        let len = table.raw_len();
        len > 0 && table.clone().pairs::<mlua::Value, mlua::Value>().count() == len
    };

    if is_array {
        let mut arr = Vec::new();
        for item in table.clone().sequence_values::<LuaValue>() {
            match item {
                Ok(v) => arr.push(lua_value_to_json(v)),
                Err(_) => break,
            }
        }
        JsonValue::Array(arr)
    } else {
        let mut map = serde_json::Map::new();
        for pair in table.clone().pairs::<String, LuaValue>() {
            if let Ok((k, v)) = pair {
                map.insert(k, lua_value_to_json(v));
            }
        }
        JsonValue::Object(map)
    }
}

fn lua_value_to_json(value: LuaValue) -> JsonValue {
    match value {
        LuaValue::Nil => JsonValue::Null,
        LuaValue::Boolean(b) => JsonValue::Bool(b),
        LuaValue::Integer(i) => JsonValue::Number(i.into()),
        LuaValue::Number(n) => serde_json::Number::from_f64(n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        LuaValue::String(s) => JsonValue::String(s.to_str().map(|s| s.to_string()).unwrap_or_default()),
        LuaValue::Table(t) => lua_table_to_json(&t),
        _ => JsonValue::Null,
    }
}

fn json_to_lua(lua: &Lua, value: &JsonValue) -> mlua::Result<LuaValue> {
    Ok(match value {
        JsonValue::Null => LuaValue::Nil,
        JsonValue::Bool(b) => LuaValue::Boolean(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                LuaValue::Integer(i)
            } else {
                LuaValue::Number(n.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(s) => LuaValue::String(lua.create_string(s)?),
        JsonValue::Array(arr) => {
            let table = lua.create_table()?;
            for (i, item) in arr.iter().enumerate() {
                table.set(i + 1, json_to_lua(lua, item)?)?;
            }
            LuaValue::Table(table)
        }
        JsonValue::Object(map) => {
            let table = lua.create_table()?;
            for (k, v) in map {
                table.set(k.clone(), json_to_lua(lua, v)?)?;
            }
            LuaValue::Table(table)
        }
    })
}
