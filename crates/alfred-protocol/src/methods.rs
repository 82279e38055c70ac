//! RPC method names registered on the gateway dispatch table.

pub const CHAT_SEND: &str = "chat.send";
pub const CHAT_STREAM: &str = "chat.stream";
pub const CHAT_ABORT: &str = "chat.abort";

pub const SESSION_LIST: &str = "session.list";
pub const SESSION_GET: &str = "session.get";
pub const SESSION_DELETE: &str = "session.delete";

pub const TOOL_LIST: &str = "tool.list";
pub const TOOL_APPROVE: &str = "tool.approve";
pub const TOOL_DENY: &str = "tool.deny";

pub const MEMORY_QUERY: &str = "memory.query";
pub const MEMORY_STORE: &str = "memory.store";
pub const MEMORY_DELETE: &str = "memory.delete";

pub const CONFIG_GET: &str = "config.get";
pub const PLUGIN_LIST: &str = "plugin.list";
pub const AGENT_LIST: &str = "agent.list";

pub const NODE_LIST: &str = "node.list";
pub const NODE_GET: &str = "node.get";
pub const NODE_INVOKE: &str = "node.invoke";
pub const NODE_DISCOVER: &str = "node.discover";
pub const NODE_TOKEN_GENERATE: &str = "node.token.generate";
pub const NODE_TOKEN_REVOKE: &str = "node.token.revoke";

pub const CRON_LIST: &str = "cron.list";
pub const CRON_GET: &str = "cron.get";
pub const CRON_CREATE: &str = "cron.create";
pub const CRON_UPDATE: &str = "cron.update";
pub const CRON_DELETE: &str = "cron.delete";
pub const CRON_RUNS: &str = "cron.runs";

pub const PROCESS_LIST: &str = "process.list";
pub const PROCESS_POLL: &str = "process.poll";
pub const PROCESS_LOG: &str = "process.log";
pub const PROCESS_WRITE: &str = "process.write";
pub const PROCESS_KILL: &str = "process.kill";
pub const PROCESS_CLEAR: &str = "process.clear";
pub const PROCESS_REMOVE: &str = "process.remove";

pub const TENANT_LIST: &str = "tenant.list";
pub const TENANT_GET: &str = "tenant.get";
pub const TENANT_CREATE: &str = "tenant.create";
pub const TENANT_UPDATE: &str = "tenant.update";
pub const TENANT_DELETE: &str = "tenant.delete";

pub const GDPR_EXPORT: &str = "gdpr.export";
pub const GDPR_DELETE: &str = "gdpr.delete";
pub const GDPR_ANONYMIZE: &str = "gdpr.anonymize";
