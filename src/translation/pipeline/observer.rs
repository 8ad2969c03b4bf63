//! 文档变更通知
//!
//! 页面脚本（或测试）插入新内容后调用 `notify_inserted`，
//! 订阅者通过各自的通道收到变更。遍历器持有订阅，取消时丢弃订阅即退订。

use std::cell::RefCell;
use std::rc::Rc;

use markup5ever_rcdom::Handle;
use tokio::sync::mpsc;

use crate::parsers::html::append_child;

/// 一次文档变更
#[derive(Debug, Clone)]
pub enum DomChange {
    /// 新插入的子树根节点
    Inserted(Handle),
}

/// 文档变更通知器
#[derive(Debug, Clone, Default)]
pub struct DomObserver {
    subscribers: Rc<RefCell<Vec<mpsc::UnboundedSender<DomChange>>>>,
}

impl DomObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 新建订阅
    pub fn subscribe(&self) -> DomSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.borrow_mut().push(tx);
        DomSubscription { receiver: rx }
    }

    /// 通知子树已插入，返回收到通知的订阅者数量
    pub fn notify_inserted(&self, node: &Handle) -> usize {
        let mut subscribers = self.subscribers.borrow_mut();
        // 已退订的通道顺便清理
        subscribers.retain(|tx| tx.send(DomChange::Inserted(node.clone())).is_ok());
        subscribers.len()
    }

    /// 追加子节点并通知
    pub fn append_and_notify(&self, parent: &Handle, child: &Handle) -> usize {
        append_child(parent, child);
        self.notify_inserted(child)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().iter().filter(|tx| !tx.is_closed()).count()
    }
}

/// 变更订阅，丢弃即退订
#[derive(Debug)]
pub struct DomSubscription {
    receiver: mpsc::UnboundedReceiver<DomChange>,
}

impl DomSubscription {
    /// 等待下一次变更，通知器全部释放后返回 `None`
    pub async fn recv(&mut self) -> Option<DomChange> {
        self.receiver.recv().await
    }

    /// 非阻塞读取已到达的变更
    pub fn try_recv(&mut self) -> Option<DomChange> {
        self.receiver.try_recv().ok()
    }
}
