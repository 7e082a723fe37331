//! Lua 5.4 sandbox for entry scripts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use mlua::{HookTriggers, Lua, LuaOptions, LuaSerdeExt, SerializeOptions, StdLib, Value, VmState};
use serde::Deserialize;

use super::{EntryScript, ScriptEntry, ScriptError};

/// Instructions executed between two limit checks.
const HOOK_INTERVAL: u32 = 10_000;

/// Globals removed from the base library.
const REMOVED_GLOBALS: &[&str] = &[
    "load",
    "loadfile",
    "dofile",
    "require",
    "collectgarbage",
    "print",
];

/// Resource limits for one script run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum number of VM instructions (0 = unlimited).
    pub max_instructions: u64,
    /// Maximum Lua heap size in bytes (0 = unlimited).
    pub max_memory: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_instructions: 1_000_000,
            max_memory: 16 * 1024 * 1024,
        }
    }
}

/// Runs each script in a fresh interpreter with only the `table`, `string`,
/// `math` and `utf8` libraries.
#[derive(Debug, Clone, Default)]
pub struct LuaSandbox {
    limits: ScriptLimits,
}

impl LuaSandbox {
    pub fn new(limits: ScriptLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }

    fn create_state(&self) -> Result<Lua, ScriptError> {
        let libs = StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::UTF8;
        let lua = Lua::new_with(libs, LuaOptions::default())
            .map_err(|e| ScriptError::Setup(e.to_string()))?;

        let globals = lua.globals();
        for name in REMOVED_GLOBALS {
            globals
                .set(*name, Value::Nil)
                .map_err(|e| ScriptError::Setup(format!("Failed to disable {}: {}", name, e)))?;
        }

        if self.limits.max_memory > 0 {
            lua.set_memory_limit(self.limits.max_memory)
                .map_err(|e| ScriptError::Setup(format!("Failed to set memory limit: {}", e)))?;
        }

        if self.limits.max_instructions > 0 {
            let count = Arc::new(AtomicU64::new(0));
            let limit = self.limits.max_instructions;
            lua.set_hook(
                HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
                move |_lua, _debug| {
                    let current =
                        count.fetch_add(HOOK_INTERVAL as u64, Ordering::Relaxed) + HOOK_INTERVAL as u64;
                    if current > limit {
                        Err(mlua::Error::RuntimeError(
                            "Script exceeded instruction limit".to_string(),
                        ))
                    } else {
                        Ok(VmState::Continue)
                    }
                },
            );
        }

        Ok(lua)
    }
}

impl EntryScript for LuaSandbox {
    fn run(&self, script: &str, entries: Vec<ScriptEntry>) -> Result<Vec<ScriptEntry>, ScriptError> {
        let lua = self.create_state()?;

        let options = SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false);
        let table = lua
            .to_value_with(&entries, options)
            .map_err(|e| ScriptError::Setup(e.to_string()))?;
        lua.globals()
            .set("entries", table)
            .map_err(|e| ScriptError::Setup(e.to_string()))?;

        lua.load(script)
            .set_name("entry_script")
            .exec()
            .map_err(|e| ScriptError::Runtime(e.to_string()))?;

        let output: Value = lua
            .globals()
            .get("entries")
            .map_err(|e| ScriptError::Output(e.to_string()))?;

        let table = match output {
            Value::Nil => return Ok(Vec::new()),
            Value::Table(table) => table,
            other => {
                return Err(ScriptError::Output(format!(
                    "expected a table, got {}",
                    other.type_name()
                )))
            }
        };

        // Deleted elements leave holes; pairs() skips them.
        let mut result = Vec::new();
        for pair in table.pairs::<Value, Value>() {
            let (_, value) = pair.map_err(|e| ScriptError::Output(e.to_string()))?;
            let entry: ScriptEntry = lua
                .from_value(value)
                .map_err(|e| ScriptError::Output(e.to_string()))?;
            result.push(entry);
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::rewrite_entries;
    use crate::storage::Entry;
    use pretty_assertions::assert_eq;

    fn entries() -> Vec<ScriptEntry> {
        vec![
            ScriptEntry {
                hash: "a".to_string(),
                title: "Hello".to_string(),
                url: Some("https://example.com/a".to_string()),
                comments_url: None,
                content: Some("<p>one</p>".to_string()),
                author: None,
            },
            ScriptEntry {
                hash: "b".to_string(),
                title: "[Sponsored] Buy".to_string(),
                url: None,
                comments_url: None,
                content: None,
                author: Some("ads".to_string()),
            },
        ]
    }

    #[test]
    fn test_script_can_modify_fields() {
        let sandbox = LuaSandbox::default();
        let out = sandbox
            .run(
                "for _, e in ipairs(entries) do e.title = string.upper(e.title) end",
                entries(),
            )
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().any(|e| e.title == "HELLO"));
    }

    #[test]
    fn test_missing_fields_are_nil_in_lua() {
        let sandbox = LuaSandbox::default();
        let out = sandbox
            .run(
                "for _, e in ipairs(entries) do if e.author == nil then e.author = 'anon' end end",
                entries(),
            )
            .unwrap();
        let a = out.iter().find(|e| e.hash == "a").unwrap();
        assert_eq!(a.author.as_deref(), Some("anon"));
    }

    #[test]
    fn test_script_can_delete_leaving_holes() {
        let sandbox = LuaSandbox::default();
        let out = sandbox
            .run(
                r#"
                for i, e in pairs(entries) do
                    if string.find(e.title, "Sponsored", 1, true) then entries[i] = nil end
                end
                "#,
                entries(),
            )
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].hash, "a");
    }

    #[test]
    fn test_sandbox_hides_dangerous_globals() {
        let sandbox = LuaSandbox::default();
        for script in [
            "os.execute('true')",
            "io.open('/etc/passwd')",
            "require('socket')",
            "load('return 1')()",
            "dofile('/tmp/x.lua')",
            "debug.getinfo(1)",
        ] {
            let result = sandbox.run(script, entries());
            assert!(
                matches!(result, Err(ScriptError::Runtime(_))),
                "{script} should fail"
            );
        }
    }

    #[test]
    fn test_instruction_limit() {
        let sandbox = LuaSandbox::new(ScriptLimits {
            max_instructions: 100_000,
            ..Default::default()
        });
        let result = sandbox.run("while true do end", entries());
        assert!(matches!(result, Err(ScriptError::Runtime(_))));
    }

    #[test]
    fn test_memory_limit() {
        let sandbox = LuaSandbox::new(ScriptLimits {
            max_instructions: 0,
            max_memory: 1024 * 1024,
        });
        let result = sandbox.run(
            "local t = {} for i = 1, 10000000 do t[i] = string.rep('x', 64) .. i end",
            entries(),
        );
        assert!(matches!(result, Err(ScriptError::Runtime(_))));
    }

    #[test]
    fn test_syntax_error_is_runtime_error() {
        let result = LuaSandbox::default().run("this is not lua", entries());
        assert!(matches!(result, Err(ScriptError::Runtime(_))));
    }

    #[test]
    fn test_non_table_output_rejected() {
        let result = LuaSandbox::default().run("entries = 42", entries());
        assert!(matches!(result, Err(ScriptError::Output(_))));

        let result = LuaSandbox::default().run("entries = nil", entries()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_rewrite_entries_with_lua() {
        let stored: Vec<Entry> = entries()
            .into_iter()
            .map(|e| Entry {
                hash: e.hash,
                title: e.title,
                url: e.url,
                comments_url: e.comments_url,
                content: e.content,
                author: e.author,
                published_at: Some(42),
            })
            .collect();

        let script = r#"
            local kept = {}
            for _, e in ipairs(entries) do
                if e.author ~= "ads" then
                    e.content = (e.content or "") .. "<p>footer</p>"
                    table.insert(kept, e)
                end
            end
            entries = kept
        "#;

        let result = rewrite_entries(&LuaSandbox::default(), script, stored).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].hash, "a");
        assert_eq!(result[0].content.as_deref(), Some("<p>one</p><p>footer</p>"));
        assert_eq!(result[0].published_at, Some(42));
    }
}
