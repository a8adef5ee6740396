//! 异步测试辅助工具

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::sleep;

pub struct TestEnv;

impl TestEnv {
    /// 在超时前反复检查条件
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        false
    }

    /// 绑定一个随机空闲端口
    pub async fn local_listener() -> TcpListener {
        TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind local test listener")
    }

    /// 获取一个当前没有进程监听的端口
    pub async fn unused_port() -> u16 {
        let listener = Self::local_listener().await;
        let port = listener.local_addr().expect("listener address").port();
        drop(listener);
        port
    }
}
