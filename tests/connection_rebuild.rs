//! Connection failure and rebuild under concurrent load.

mod support;

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use sourced_broker::{CancellationToken, ConsumerClient, ConsumerClientFactory, LogType};
use support::stack;

#[test]
fn concurrent_callers_rebuild_exactly_one_connection() {
    let stack = stack(4);
    stack.pool.get_connection().unwrap();
    stack.broker.interrupt_connections();

    let callers = 16;
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let pool = Arc::clone(&stack.pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                pool.get_connection().unwrap()
            })
        })
        .collect();

    let connections: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(stack.broker.connections_opened(), 2);
    assert_eq!(stack.broker.open_connections(), 1);
    assert!(connections.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(stack.pool.manager().generation(), 2);
}

#[test]
fn concurrent_publishers_survive_interruption() {
    let stack = Arc::new(stack(4));
    stack.pool.get_connection().unwrap();

    let barrier = Arc::new(Barrier::new(9));
    let publishers: Vec<_> = (0..8)
        .map(|worker| {
            let stack = Arc::clone(&stack);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..50)
                    .filter(|i| {
                        stack
                            .sender
                            .publish("load.test", &format!("{}-{}", worker, i))
                            .is_success()
                    })
                    .count()
            })
        })
        .collect();

    barrier.wait();
    stack.broker.interrupt_connections();

    let succeeded: usize = publishers.into_iter().map(|h| h.join().unwrap()).sum();

    // Sends racing the interruption may fail; everything after it must
    // succeed on the rebuilt connection.
    assert!(succeeded > 0);
    assert!(stack.sender.publish("load.test", "after").is_success());
    assert_eq!(stack.broker.open_connections(), 1);
    assert!(stack.pool.idle_count() <= stack.pool.capacity());
}

#[test]
fn consumer_recreated_after_interruption_resumes() {
    let stack = stack(4);
    let client = stack.factory.create("audit").unwrap();
    client.subscribe(["audit.*"]).unwrap();
    let logs = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&logs);
    client.on_log(move |log| sink.lock().unwrap().push(log.log_type));

    stack.broker.interrupt_connections();
    let err = client
        .listening(Duration::from_millis(10), &CancellationToken::new())
        .unwrap_err();
    assert!(err.is_connectivity());
    assert!(logs.lock().unwrap().contains(&LogType::ServerConnError));
    client.dispose();

    let client = stack.factory.create("audit").unwrap();
    client.subscribe(["audit.*"]).unwrap();
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    client.on_message_received(move |context| sink.lock().unwrap().push(context.name.clone()));

    assert!(stack.sender.publish("audit.login", "{}").is_success());
    let token = CancellationToken::new();
    token.cancel();
    client.listening(Duration::from_millis(20), &token).unwrap();
    client.commit().unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["audit.login".to_string()]);
    assert_eq!(stack.broker.connections_opened(), 2);
}
