use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// 有界工作池：进程启动时创建，退出前调用 shutdown 回收全部任务。
/// 每个任务独占自己的文档句柄与输出目录，池内不共享可变状态。
pub struct WorkerPool<T> {
    permits: Arc<Semaphore>,
    tasks: JoinSet<T>,
    size: usize,
}

impl<T: Send + 'static> WorkerPool<T> {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        info!("工作池已创建，最大并行数: {}", size);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            tasks: JoinSet::new(),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn submit<F>(&mut self, job: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        self.tasks.spawn(async move {
            // The semaphore is only closed by shutdown, after every task has joined.
            let _permit = permits.acquire_owned().await.ok();
            job.await
        });
    }

    /// 等待所有任务结束，按完成顺序返回结果
    pub async fn shutdown(mut self) -> Vec<T> {
        let mut results = Vec::with_capacity(self.tasks.len());
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(value) => results.push(value),
                Err(e) => warn!("工作任务异常退出: {}", e),
            }
        }
        self.permits.close();
        info!("工作池已关闭，共完成 {} 个任务", results.len());
        results
    }
}
