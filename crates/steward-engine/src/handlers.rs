//! Built-in actions and their handlers.
//!
//! Domain-backed actions forward `(action, params)` to the domain service and
//! render the JSON it returns. Operational actions (stats, log export and
//! cleanup) read the audit log. Wizard and cancel actions hand control back
//! to the engine through [`ActionOutput`].

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use steward_audit::TimeRange;
use steward_core::{ActionCategory, Reply, UNKNOWN_ACTION};

use crate::dispatcher::HandlerContext;
use crate::error::{EngineError, HandlerError};
use crate::registry::{ActionDescriptor, ActionHandler, ActionOutput, ActionRegistry};
use crate::wizard::WizardKind;

const DEFAULT_STATS_DAYS: u32 = 7;
const MAX_RENDERED_ITEMS: usize = 20;

// =============================================================================
// Schemas
// =============================================================================

fn id_param() -> Value {
    json!({ "type": ["string", "integer"], "pattern": "^[0-9]+$", "minimum": 0 })
}

fn limit_param() -> Value {
    json!({ "type": "integer", "minimum": 1, "maximum": 50 })
}

fn days_param(max: u32) -> Value {
    json!({ "type": "integer", "minimum": 1, "maximum": max })
}

fn text_param(max: usize) -> Value {
    json!({ "type": "string", "minLength": 1, "maxLength": max })
}

fn order_status() -> Value {
    json!({ "enum": ["pending", "paid", "processing", "shipped", "delivered", "cancelled"] })
}

/// Object schema with the given properties and required names.
fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

fn empty() -> Value {
    object(json!({}), &[])
}

// =============================================================================
// Registry
// =============================================================================

/// The full action registry.
pub fn standard_registry() -> Result<ActionRegistry, EngineError> {
    let mut registry = ActionRegistry::new();

    let actions = vec![
        // ----- orders -----
        domain_action("list_orders", ActionCategory::Order)
            .description("List recent orders, optionally by status")
            .schema(object(
                json!({ "status": order_status(), "limit": limit_param() }),
                &[],
            ))
            .example("show me the last 5 paid orders", json!({"status": "paid", "limit": 5}))
            .quick_command("/orders"),
        domain_action("get_order", ActionCategory::Order)
            .description("Show one order")
            .schema(object(json!({ "orderId": id_param() }), &["orderId"]))
            .example("what's in order 1042?", json!({"orderId": "1042"})),
        domain_action("update_order_status", ActionCategory::Order)
            .description("Change an order's status")
            .schema(object(
                json!({ "orderId": id_param(), "status": order_status() }),
                &["orderId", "status"],
            ))
            .example("mark order 77 as shipped", json!({"orderId": "77", "status": "shipped"})),
        domain_action("cancel_order", ActionCategory::Order)
            .destructive()
            .description("Cancel an order")
            .schema(object(json!({ "orderId": id_param() }), &["orderId"]))
            .example("cancel order 12", json!({"orderId": "12"})),
        // ----- products -----
        domain_action("list_products", ActionCategory::Product)
            .description("List or search products")
            .schema(object(
                json!({ "query": text_param(100), "limit": limit_param() }),
                &[],
            ))
            .example("find mugs", json!({"query": "mug"}))
            .quick_command("/products"),
        domain_action("get_product", ActionCategory::Product)
            .description("Show one product")
            .schema(object(json!({ "productId": id_param() }), &["productId"])),
        ActionDescriptor::new(
            "create_product",
            ActionCategory::Product,
            Arc::new(StartWizard(WizardKind::CreateProduct)),
        )
        .description("Add a product step by step")
        .schema(empty())
        .example("add a new product", json!({}))
        .quick_command("/newproduct"),
        domain_action("update_price", ActionCategory::Product)
            .description("Set a product's price")
            .schema(object(
                json!({
                    "productId": id_param(),
                    "price": { "type": "number", "exclusiveMinimum": 0 }
                }),
                &["productId", "price"],
            ))
            .example("set price of product 8 to 24.90", json!({"productId": "8", "price": 24.9})),
        domain_action("update_stock", ActionCategory::Product)
            .description("Set a product's stock level")
            .schema(object(
                json!({
                    "productId": id_param(),
                    "stock": { "type": "integer", "minimum": 0 }
                }),
                &["productId", "stock"],
            ))
            .example("we have 30 of product 8 now", json!({"productId": "8", "stock": 30})),
        domain_action("delete_product", ActionCategory::Product)
            .destructive()
            .description("Delete a product")
            .schema(object(json!({ "productId": id_param() }), &["productId"]))
            .example("delete product 42", json!({"productId": "42"})),
        // ----- categories -----
        domain_action("list_categories", ActionCategory::Category)
            .description("List categories")
            .schema(empty()),
        ActionDescriptor::new(
            "create_category",
            ActionCategory::Category,
            Arc::new(StartWizard(WizardKind::CreateCategory)),
        )
        .description("Add a category step by step")
        .schema(empty())
        .quick_command("/newcategory"),
        domain_action("delete_category", ActionCategory::Category)
            .destructive()
            .description("Delete a category")
            .schema(object(json!({ "categoryId": id_param() }), &["categoryId"])),
        // ----- media -----
        domain_action("list_media", ActionCategory::Media)
            .description("List a product's photos and videos")
            .schema(object(json!({ "productId": id_param() }), &["productId"])),
        domain_action("delete_media", ActionCategory::Media)
            .destructive()
            .description("Delete a photo or video")
            .schema(object(json!({ "mediaId": id_param() }), &["mediaId"])),
        // ----- customers -----
        domain_action("list_customers", ActionCategory::Crm)
            .description("List or search customers")
            .schema(object(
                json!({ "query": text_param(100), "limit": limit_param() }),
                &[],
            )),
        // ----- stats -----
        domain_action("sales_summary", ActionCategory::Stats)
            .description("Revenue and order totals")
            .schema(object(json!({ "days": days_param(365) }), &[]))
            .example("how did we do this month?", json!({"days": 30})),
        // ----- reviews -----
        domain_action("list_reviews", ActionCategory::Review)
            .description("List reviews, optionally for one product")
            .schema(object(json!({ "productId": id_param() }), &[])),
        domain_action("delete_review", ActionCategory::Review)
            .destructive()
            .description("Delete a review")
            .schema(object(json!({ "reviewId": id_param() }), &["reviewId"])),
        // ----- fulfillment / payment -----
        domain_action("create_shipment", ActionCategory::Fulfillment)
            .description("Create a shipment for an order")
            .schema(object(
                json!({ "orderId": id_param(), "carrier": text_param(40) }),
                &["orderId"],
            )),
        domain_action("refund_payment", ActionCategory::Payment)
            .destructive()
            .description("Refund an order, fully or partially")
            .schema(object(
                json!({
                    "orderId": id_param(),
                    "amount": { "type": "number", "exclusiveMinimum": 0 }
                }),
                &["orderId"],
            ))
            .example("refund 10 on order 55", json!({"orderId": "55", "amount": 10})),
        // ----- automation / marketing -----
        domain_action("create_automation", ActionCategory::Automation)
            .description("Run an action automatically when something happens")
            .schema(object(
                json!({ "trigger": text_param(100), "actionName": text_param(60) }),
                &["trigger", "actionName"],
            )),
        domain_action("send_broadcast", ActionCategory::Marketing)
            .destructive()
            .description("Send a message to all subscribers")
            .schema(object(json!({ "message": text_param(4000) }), &["message"])),
        // ----- system -----
        ActionDescriptor::new("help", ActionCategory::System, Arc::new(Help))
            .description("Explain what the bot can do")
            .schema(empty())
            .quick_command("/start")
            .quick_command("/help"),
        ActionDescriptor::new("cancel", ActionCategory::System, Arc::new(Cancel))
            .description("Stop the current wizard or pending confirmation")
            .schema(empty())
            .quick_command("/cancel"),
        ActionDescriptor::new("view_stats", ActionCategory::System, Arc::new(ViewStats))
            .description("Bot usage statistics")
            .schema(object(json!({ "days": days_param(365) }), &[]))
            .quick_command("/stats"),
        ActionDescriptor::new("export_logs", ActionCategory::System, Arc::new(ExportLogs))
            .description("Download the audit log as a file")
            .schema(object(json!({ "days": days_param(365) }), &[]))
            .quick_command("/export"),
        ActionDescriptor::new("cleanup_logs", ActionCategory::System, Arc::new(CleanupLogs))
            .destructive()
            .description("Delete old audit log entries")
            .schema(object(json!({ "olderThanDays": days_param(3650) }), &[]))
            .quick_command("/cleanup"),
        ActionDescriptor::new(UNKNOWN_ACTION, ActionCategory::Unknown, Arc::new(Fallback))
            .description("Nothing else fits")
            .schema(object(json!({ "originalText": { "type": "string" } }), &[])),
    ];

    for action in actions {
        registry.register(action)?;
    }
    Ok(registry)
}

// =============================================================================
// Handlers
// =============================================================================

fn domain_action(name: &str, category: ActionCategory) -> ActionDescriptor {
    ActionDescriptor::new(
        name,
        category,
        Arc::new(DomainAction {
            action: name.to_string(),
        }),
    )
}

/// Forwards to the domain service and renders the result.
struct DomainAction {
    action: String,
}

#[async_trait]
impl ActionHandler for DomainAction {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        params: &Map<String, Value>,
    ) -> Result<ActionOutput, HandlerError> {
        let result = ctx.invoke(&self.action, params).await?;
        Ok(ActionOutput::Reply(Reply::text(render(&self.action, &result))))
    }
}

struct StartWizard(WizardKind);

#[async_trait]
impl ActionHandler for StartWizard {
    async fn handle(
        &self,
        _ctx: &HandlerContext<'_>,
        _params: &Map<String, Value>,
    ) -> Result<ActionOutput, HandlerError> {
        Ok(ActionOutput::StartWizard(self.0))
    }
}

struct Cancel;

#[async_trait]
impl ActionHandler for Cancel {
    async fn handle(
        &self,
        _ctx: &HandlerContext<'_>,
        _params: &Map<String, Value>,
    ) -> Result<ActionOutput, HandlerError> {
        Ok(ActionOutput::CancelAll)
    }
}

struct Help;

#[async_trait]
impl ActionHandler for Help {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        _params: &Map<String, Value>,
    ) -> Result<ActionOutput, HandlerError> {
        Ok(ActionOutput::Reply(Reply::text(help_text(ctx))))
    }
}

/// Unrecognised requests. A normal outcome, not an error.
struct Fallback;

#[async_trait]
impl ActionHandler for Fallback {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        _params: &Map<String, Value>,
    ) -> Result<ActionOutput, HandlerError> {
        Ok(ActionOutput::Reply(Reply::text(format!(
            "Sorry, I didn't understand that.\n\n{}",
            help_text(ctx)
        ))))
    }
}

struct ViewStats;

#[async_trait]
impl ActionHandler for ViewStats {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        params: &Map<String, Value>,
    ) -> Result<ActionOutput, HandlerError> {
        let days = u32_param(params, "days")?.unwrap_or(DEFAULT_STATS_DAYS);
        let stats = ctx
            .audit
            .aggregate(TimeRange::last_days(ctx.audit.now(), days))
            .await?;
        Ok(ActionOutput::Reply(Reply::text(format!(
            "Last {} days\n\n{}",
            days,
            stats.summary()
        ))))
    }
}

struct ExportLogs;

#[async_trait]
impl ActionHandler for ExportLogs {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        params: &Map<String, Value>,
    ) -> Result<ActionOutput, HandlerError> {
        let days = u32_param(params, "days")?.unwrap_or(DEFAULT_STATS_DAYS);
        let now = ctx.audit.now();
        let entries = ctx.audit.export(TimeRange::last_days(now, days)).await?;

        let mut bytes = Vec::new();
        for entry in &entries {
            serde_json::to_writer(&mut bytes, entry)?;
            bytes.push(b'\n');
        }

        let filename = format!("audit-{}.jsonl", now.format("%Y%m%d-%H%M%S"));
        let caption = format!("{} entries from the last {} days", entries.len(), days);
        Ok(ActionOutput::Reply(Reply::document(filename, bytes, Some(caption))))
    }
}

struct CleanupLogs;

#[async_trait]
impl ActionHandler for CleanupLogs {
    async fn handle(
        &self,
        ctx: &HandlerContext<'_>,
        params: &Map<String, Value>,
    ) -> Result<ActionOutput, HandlerError> {
        let removed = match u32_param(params, "olderThanDays")? {
            Some(days) => ctx.audit.sweep(days).await?,
            None => ctx.audit.sweep_retention().await?,
        };
        Ok(ActionOutput::Reply(Reply::text(format!(
            "Removed {} old log entries.",
            removed
        ))))
    }
}

// =============================================================================
// Rendering
// =============================================================================

fn help_text(ctx: &HandlerContext<'_>) -> String {
    let mut out = String::from(
        "Tell me what you need in plain words, e.g. \"show today's orders\" \
         or \"set price of product 8 to 24.90\".\n\nShortcuts:",
    );
    for action in ctx.registry.list() {
        for command in &action.quick_commands {
            out.push_str(&format!("\n{} - {}", command, action.description));
        }
    }
    out
}

/// Human-readable rendering of a domain result.
pub fn render(action: &str, value: &Value) -> String {
    match value {
        Value::Null => format!("Done: {}.", action.replace('_', " ")),
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            if let Some(Value::String(message)) = map.get("message") {
                return message.clone();
            }
            if let Some(Value::Array(items)) = map.get("items") {
                return render_list(items);
            }
            render_fields(map)
        }
        Value::Array(items) => render_list(items),
        other => other.to_string(),
    }
}

fn render_list(items: &[Value]) -> String {
    if items.is_empty() {
        return "Nothing found.".to_string();
    }
    let mut lines: Vec<String> = items
        .iter()
        .take(MAX_RENDERED_ITEMS)
        .map(|item| match item {
            Value::Object(map) => format!("• {}", one_line(map)),
            Value::String(s) => format!("• {}", s),
            other => format!("• {}", other),
        })
        .collect();
    if items.len() > MAX_RENDERED_ITEMS {
        lines.push(format!("… and {} more", items.len() - MAX_RENDERED_ITEMS));
    }
    lines.join("\n")
}

fn render_fields(map: &Map<String, Value>) -> String {
    map.iter()
        .map(|(k, v)| format!("{}: {}", k, scalar(v)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn one_line(map: &Map<String, Value>) -> String {
    map.iter()
        .map(|(k, v)| format!("{}={}", k, scalar(v)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn u32_param(params: &Map<String, Value>, key: &str) -> Result<Option<u32>, HandlerError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .filter(|n| *n > 0)
            .map(Some)
            .ok_or_else(|| HandlerError::InvalidParams(format!("{} must be a positive integer", key))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_core::UNKNOWN_ACTION;

    #[test]
    fn test_standard_registry_builds() {
        let registry = standard_registry().unwrap();
        assert_eq!(registry.len(), 29);
        assert!(registry.contains(UNKNOWN_ACTION));

        let destructive: Vec<_> = registry
            .list()
            .filter(|a| a.destructive)
            .map(|a| a.name.as_str())
            .collect();
        assert_eq!(
            destructive,
            vec![
                "cancel_order",
                "delete_product",
                "delete_category",
                "delete_media",
                "delete_review",
                "refund_payment",
                "send_broadcast",
                "cleanup_logs",
            ]
        );
    }

    #[test]
    fn test_quick_commands() {
        let registry = standard_registry().unwrap();
        for (command, action) in [
            ("/start", "help"),
            ("/help", "help"),
            ("/cancel", "cancel"),
            ("/stats", "view_stats"),
            ("/orders", "list_orders"),
            ("/products", "list_products"),
            ("/newproduct", "create_product"),
            ("/newcategory", "create_category"),
            ("/export", "export_logs"),
            ("/cleanup", "cleanup_logs"),
        ] {
            assert_eq!(registry.quick_command(command).unwrap().name, action);
        }
    }

    #[test]
    fn test_examples_match_their_schemas() {
        let registry = standard_registry().unwrap();
        for action in registry.list() {
            for example in &action.examples {
                let params = example.params.as_object().cloned().unwrap_or_default();
                assert!(
                    registry.validate_params(&action.name, &params).is_ok(),
                    "example for {} does not validate",
                    action.name
                );
            }
        }
    }

    #[test]
    fn test_param_schemas() {
        let registry = standard_registry().unwrap();
        let check = |action: &str, params: Value| {
            registry
                .validate_params(action, params.as_object().unwrap())
                .is_ok()
        };

        assert!(check("update_price", json!({"productId": "3", "price": 9.5})));
        assert!(!check("update_price", json!({"productId": "3", "price": 0})));
        assert!(!check("update_price", json!({"productId": "3", "price": "9.5"})));
        assert!(check("update_stock", json!({"productId": 3, "stock": 0})));
        assert!(!check("update_stock", json!({"productId": "3", "stock": -1})));
        assert!(!check("get_order", json!({"orderId": "abc"})));
        assert!(!check("list_orders", json!({"limit": 51})));
        assert!(!check("sales_summary", json!({"days": 0})));
        assert!(!check("help", json!({"topic": "orders"})));
    }

    #[test]
    fn test_render() {
        assert_eq!(render("delete_product", &Value::Null), "Done: delete product.");
        assert_eq!(render("x", &json!({"message": "Order 5 cancelled"})), "Order 5 cancelled");
        assert_eq!(
            render("list_orders", &json!({"items": [{"id": 1, "status": "paid"}]})),
            "• id=1, status=paid"
        );
        assert_eq!(render("list_orders", &json!([])), "Nothing found.");
        assert_eq!(render("get_order", &json!({"id": 5, "total": "12.00"})), "id: 5\ntotal: 12.00");
    }
}
