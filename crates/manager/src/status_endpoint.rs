use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

/// Worker槽位占用情况，由所有轮询循环共享
#[derive(Debug, Clone)]
pub struct SlotUsage {
    name: Arc<str>,
    slots: u32,
    busy: Arc<AtomicU32>,
}

/// 槽位占用凭证，释放时归还槽位
pub struct BusySlot {
    busy: Arc<AtomicU32>,
}

impl Drop for BusySlot {
    fn drop(&mut self) {
        self.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SlotUsage {
    pub fn new(name: impl Into<Arc<str>>, slots: u32) -> Self {
        Self {
            name: name.into(),
            slots,
            busy: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn occupy(&self) -> BusySlot {
        self.busy.fetch_add(1, Ordering::SeqCst);
        BusySlot {
            busy: self.busy.clone(),
        }
    }

    pub fn busy(&self) -> u32 {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn slots(&self) -> u32 {
        self.slots
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Serialize)]
struct StatusDocument {
    status: &'static str,
    name: String,
    slots: u32,
    busy: u32,
}

async fn status(State(usage): State<SlotUsage>) -> Json<StatusDocument> {
    let busy = usage.busy();
    Json(StatusDocument {
        status: if busy > 0 { "busy" } else { "idle" },
        name: usage.name.to_string(),
        slots: usage.slots,
        busy,
    })
}

/// 状态端点，服务器的存活探测访问 `GET /`
pub fn status_router(usage: SlotUsage) -> Router {
    Router::new().route("/", get(status)).with_state(usage)
}
