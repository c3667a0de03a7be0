//! End-to-end tests: element trees in, host mutations out.
//!
//! Everything here drives the runtime through its public API against the
//! in-memory reference host and asserts on its operation log - which
//! mutations a commit performed, and in what order.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use reweave::{
    Context, Dep, Dispatch, Element, HostOp, InstanceId, MemoryHost, Priority, Props, Runtime,
    RuntimeOptions, TransitionStart, YieldPolicy, cleanup, component, create_node_ref,
};

type SharedHost = Rc<RefCell<MemoryHost>>;

fn setup() -> (SharedHost, Runtime, reweave::Root, InstanceId) {
    setup_with(YieldPolicy::Never)
}

fn setup_with(yield_policy: YieldPolicy) -> (SharedHost, Runtime, reweave::Root, InstanceId) {
    let host = Rc::new(RefCell::new(MemoryHost::new()));
    let container = host.borrow_mut().create_container();
    let runtime = Runtime::with_options(host.clone(), RuntimeOptions { yield_policy });
    let root = runtime.create_root(container);
    (host, runtime, root, container)
}

fn mutations(host: &SharedHost) -> Vec<HostOp> {
    host.borrow_mut()
        .take_ops()
        .into_iter()
        .filter(HostOp::is_tree_mutation)
        .collect()
}

fn keyed_item(tag: &str, label: &str) -> Element {
    Element::host(tag, Props::new(), label).with_key(label)
}

// =============================================================================
// Mounting
// =============================================================================

#[test]
fn test_mounts_a_host_tree() {
    let (host, runtime, root, container) = setup();

    root.render(Element::host(
        "div",
        Props::new().set("class", "panel"),
        vec![
            Element::host("span", Props::new(), "hello"),
            Element::text("world"),
        ],
    ));
    runtime.flush().unwrap();

    assert_eq!(
        host.borrow().markup(container),
        "<div class=\"panel\"><span>hello</span>world</div>"
    );
}

#[test]
fn test_rerender_of_identical_tree_commits_nothing() {
    let (host, runtime, root, container) = setup();
    let tree = || {
        Element::host(
            "div",
            Props::new().set("class", "panel"),
            vec![Element::host("span", Props::new(), "hello")],
        )
    };

    root.render(tree());
    runtime.flush().unwrap();
    host.borrow_mut().take_ops();

    root.render(tree());
    runtime.flush().unwrap();

    assert!(host.borrow().ops().is_empty());
    assert_eq!(
        host.borrow().markup(container),
        "<div class=\"panel\"><span>hello</span></div>"
    );
}

#[test]
fn test_components_and_fragments_are_transparent() {
    let (host, runtime, root, container) = setup();

    let greeting = component(|_ctx, props| {
        let name = props.str("name").unwrap_or("?").to_string();
        Element::fragment(vec![Element::text("hi "), Element::text(name)])
    });

    root.render(Element::host(
        "div",
        Props::new(),
        vec![Element::from_component(&greeting, Props::new().set("name", "ada"))],
    ));
    runtime.flush().unwrap();

    assert_eq!(host.borrow().markup(container), "<div>hi ada</div>");
}

// =============================================================================
// Updates in place
// =============================================================================

#[test]
fn test_text_updates_in_place() {
    let (host, runtime, root, container) = setup();

    root.render(Element::host("div", Props::new(), "one"));
    runtime.flush().unwrap();
    host.borrow_mut().take_ops();

    root.render(Element::host("div", Props::new(), "two"));
    runtime.flush().unwrap();

    let ops = host.borrow_mut().take_ops();
    assert_eq!(ops.len(), 1);
    assert!(matches!(&ops[0], HostOp::UpdateText { text, .. } if text == "two"));
    assert_eq!(host.borrow().markup(container), "<div>two</div>");
}

#[test]
fn test_prop_changes_stage_a_single_update() {
    let (host, runtime, root, container) = setup();

    root.render(Element::host("div", Props::new().set("class", "a"), ()));
    runtime.flush().unwrap();
    host.borrow_mut().take_ops();

    root.render(Element::host("div", Props::new().set("class", "b"), ()));
    runtime.flush().unwrap();

    let ops = mutations(&host);
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0], HostOp::UpdateProps { .. }));
    assert_eq!(host.borrow().markup(container), "<div class=\"b\"></div>");
}

#[test]
fn test_type_change_remounts_the_subtree() {
    let (host, runtime, root, container) = setup();

    root.render(Element::host("div", Props::new(), "x"));
    runtime.flush().unwrap();
    host.borrow_mut().take_ops();

    root.render(Element::host("section", Props::new(), "x"));
    runtime.flush().unwrap();

    assert_eq!(host.borrow().markup(container), "<section>x</section>");
    let ops = mutations(&host);
    // One removal of the old tree, one placement of the new.
    assert!(ops.iter().any(|op| matches!(op, HostOp::Remove { .. })));
    assert!(ops.iter().any(|op| matches!(op, HostOp::Append { .. })));
}

// =============================================================================
// Keyed lists
// =============================================================================

#[test]
fn test_moving_head_to_tail_places_only_that_item() {
    let (host, runtime, root, container) = setup();

    root.render(Element::host(
        "ul",
        Props::new(),
        vec![
            keyed_item("li", "a"),
            keyed_item("li", "b"),
            keyed_item("li", "c"),
        ],
    ));
    runtime.flush().unwrap();
    let ul = host.borrow().children(container)[0];
    let original = host.borrow().children(ul);
    host.borrow_mut().take_ops();

    root.render(Element::host(
        "ul",
        Props::new(),
        vec![
            keyed_item("li", "b"),
            keyed_item("li", "c"),
            keyed_item("li", "a"),
        ],
    ));
    runtime.flush().unwrap();

    // Only "a" moved; its siblings were left alone.
    let ops = mutations(&host);
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0], HostOp::Append { child, .. } if child == original[0]));
    assert_eq!(
        host.borrow().children(ul),
        vec![original[1], original[2], original[0]]
    );
}

#[test]
fn test_inserting_at_head_anchors_on_stable_sibling() {
    let (host, runtime, root, container) = setup();

    root.render(Element::host(
        "ul",
        Props::new(),
        vec![keyed_item("li", "a"), keyed_item("li", "b")],
    ));
    runtime.flush().unwrap();
    let ul = host.borrow().children(container)[0];
    let original = host.borrow().children(ul);
    host.borrow_mut().take_ops();

    root.render(Element::host(
        "ul",
        Props::new(),
        vec![
            keyed_item("li", "c"),
            keyed_item("li", "a"),
            keyed_item("li", "b"),
        ],
    ));
    runtime.flush().unwrap();

    let ops = mutations(&host);
    assert_eq!(ops.len(), 1);
    assert!(
        matches!(ops[0], HostOp::Insert { before, .. } if before == original[0]),
        "new head should insert before the old head"
    );
    assert_eq!(host.borrow().markup(ul), "<li>c</li><li>a</li><li>b</li>");
}

#[test]
fn test_removed_keys_are_deleted() {
    let (host, runtime, root, container) = setup();

    root.render(Element::host(
        "ul",
        Props::new(),
        vec![keyed_item("li", "a"), keyed_item("li", "b")],
    ));
    runtime.flush().unwrap();
    let ul = host.borrow().children(container)[0];
    host.borrow_mut().take_ops();

    root.render(Element::host("ul", Props::new(), vec![keyed_item("li", "a")]));
    runtime.flush().unwrap();

    let ops = mutations(&host);
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0], HostOp::Remove { .. }));
    assert_eq!(host.borrow().markup(ul), "<li>a</li>");
}

#[test]
fn test_keyed_reuse_preserves_hook_state() {
    let (host, runtime, root, container) = setup();

    let setters: Rc<RefCell<Vec<(String, Dispatch<i32>)>>> = Rc::new(RefCell::new(Vec::new()));
    let item = {
        let setters = setters.clone();
        component(move |ctx, props| {
            let label = props.str("label").unwrap_or("?").to_string();
            let (count, set_count) = ctx.use_state(0);
            setters.borrow_mut().push((label.clone(), set_count));
            Element::host("li", Props::new(), format!("{label}:{count}"))
        })
    };
    let list = |order: &[&str]| {
        Element::host(
            "ul",
            Props::new(),
            order
                .iter()
                .map(|label| {
                    Element::from_component(&item, Props::new().set("label", *label))
                        .with_key(*label)
                })
                .collect::<Vec<_>>(),
        )
    };

    root.render(list(&["x", "y"]));
    runtime.flush().unwrap();

    // Bump y's counter, then reorder: the state must follow the key.
    let set_y = setters
        .borrow()
        .iter()
        .rev()
        .find(|(l, _)| l == "y")
        .unwrap()
        .1
        .clone();
    set_y.update(|n| n + 1);
    runtime.flush().unwrap();

    root.render(list(&["y", "x"]));
    runtime.flush().unwrap();

    let ul = host.borrow().children(container)[0];
    assert_eq!(host.borrow().markup(ul), "<li>y:1</li><li>x:0</li>");
}

// =============================================================================
// State batching
// =============================================================================

struct Counter {
    component: reweave::ComponentFn,
    renders: Rc<Cell<u32>>,
    setter: Rc<RefCell<Option<Dispatch<i32>>>>,
}

fn counter() -> Counter {
    let renders = Rc::new(Cell::new(0));
    let setter: Rc<RefCell<Option<Dispatch<i32>>>> = Rc::new(RefCell::new(None));
    let component = {
        let renders = renders.clone();
        let setter = setter.clone();
        component(move |ctx, _props| {
            renders.set(renders.get() + 1);
            let (value, set_value) = ctx.use_state(0);
            *setter.borrow_mut() = Some(set_value);
            Element::text(value.to_string())
        })
    };
    Counter {
        component,
        renders,
        setter,
    }
}

#[test]
fn test_update_burst_coalesces_into_one_render() {
    let (host, runtime, root, container) = setup();
    let counter = counter();

    root.render(Element::from_component(&counter.component, Props::new()));
    runtime.flush().unwrap();
    assert_eq!(counter.renders.get(), 1);
    assert_eq!(host.borrow().markup(container), "0");

    let set = counter.setter.borrow().clone().unwrap();
    set.update(|n| n + 1);
    set.update(|n| n + 1);
    set.update(|n| n + 1);
    runtime.flush().unwrap();

    // One render pass, updates applied as a left fold in arrival order.
    assert_eq!(counter.renders.get(), 2);
    assert_eq!(host.borrow().markup(container), "3");
}

#[test]
fn test_sync_burst_flushes_once_within_the_task() {
    let (host, runtime, root, container) = setup();
    let counter = counter();

    root.render(Element::from_component(&counter.component, Props::new()));
    runtime.flush().unwrap();
    let set = counter.setter.borrow().clone().unwrap();

    runtime
        .run_with_priority(Priority::Immediate, || {
            set.update(|n| n + 1);
            set.update(|n| n + 1);
            set.update(|n| n + 1);
        })
        .unwrap();

    // The microtask flush ran before run_with_priority returned.
    assert_eq!(counter.renders.get(), 2);
    assert_eq!(host.borrow().markup(container), "3");
    assert!(!runtime.has_pending_work());
}

#[test]
fn test_replace_and_function_updates_fold_in_arrival_order() {
    let (host, runtime, root, container) = setup();
    let counter = counter();

    root.render(Element::from_component(&counter.component, Props::new()));
    runtime.flush().unwrap();
    let set = counter.setter.borrow().clone().unwrap();

    set.update(|n| n + 1);
    set.set(10);
    set.update(|n| n * 2);
    runtime.flush().unwrap();

    assert_eq!(host.borrow().markup(container), "20");
}

// =============================================================================
// Lifecycle effects
// =============================================================================

#[test]
fn test_mount_once_effect_runs_once_and_cleans_up_on_unmount() {
    let (_host, runtime, root, _container) = setup();
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let item = {
        let log = log.clone();
        component(move |ctx, props| {
            let label = props.str("label").unwrap_or("?").to_string();
            let log_create = log.clone();
            let log_cleanup = log.clone();
            ctx.use_effect(
                move || {
                    log_create.borrow_mut().push(format!("create:{label}"));
                    cleanup(move || {
                        log_cleanup.borrow_mut().push(format!("cleanup:{label}"));
                    })
                },
                Some(vec![]),
            );
            Element::text("·")
        })
    };
    let list = |labels: &[&str]| {
        Element::host(
            "div",
            Props::new(),
            labels
                .iter()
                .map(|l| {
                    Element::from_component(&item, Props::new().set("label", *l)).with_key(*l)
                })
                .collect::<Vec<_>>(),
        )
    };

    root.render(list(&["a", "b"]));
    runtime.flush().unwrap();
    assert_eq!(*log.borrow(), vec!["create:a", "create:b"]);

    // Re-render with no membership change: empty deps never re-run.
    root.render(list(&["a", "b"]));
    runtime.flush().unwrap();
    assert_eq!(log.borrow().len(), 2);

    // Drop b, add c: the unmount cleanup runs before the new create.
    root.render(list(&["a", "c"]));
    runtime.flush().unwrap();
    assert_eq!(
        *log.borrow(),
        vec!["create:a", "create:b", "cleanup:b", "create:c"]
    );
}

#[test]
fn test_effect_reruns_only_when_dep_changes() {
    let (_host, runtime, root, _container) = setup();
    let log: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let watcher = {
        let log = log.clone();
        component(move |ctx, props| {
            let x = match props.get("x") {
                Some(reweave::PropValue::Int(n)) => *n,
                _ => 0,
            };
            let log_create = log.clone();
            let log_cleanup = log.clone();
            ctx.use_effect(
                move || {
                    log_create.borrow_mut().push(format!("create:{x}"));
                    cleanup(move || {
                        log_cleanup.borrow_mut().push(format!("cleanup:{x}"));
                    })
                },
                Some(vec![Dep::from(x)]),
            );
            Element::text(x.to_string())
        })
    };
    let app = |x: i64| Element::from_component(&watcher, Props::new().set("x", x));

    root.render(app(1));
    runtime.flush().unwrap();
    root.render(app(1));
    runtime.flush().unwrap();
    assert_eq!(*log.borrow(), vec!["create:1"]);

    root.render(app(2));
    runtime.flush().unwrap();
    assert_eq!(*log.borrow(), vec!["create:1", "cleanup:1", "create:2"]);
}

#[test]
fn test_effect_without_deps_runs_every_render() {
    let (_host, runtime, root, _container) = setup();
    let runs = Rc::new(Cell::new(0u32));

    let noisy = {
        let runs = runs.clone();
        component(move |ctx, _props| {
            let runs = runs.clone();
            ctx.use_effect(
                move || {
                    runs.set(runs.get() + 1);
                    None
                },
                None,
            );
            Element::text("·")
        })
    };

    root.render(Element::from_component(&noisy, Props::new()));
    runtime.flush().unwrap();
    root.render(Element::from_component(&noisy, Props::new()));
    runtime.flush().unwrap();
    root.render(Element::from_component(&noisy, Props::new()));
    runtime.flush().unwrap();

    assert_eq!(runs.get(), 3);
}

#[test]
fn test_effect_driven_update_schedules_another_pass() {
    let (host, runtime, root, container) = setup();

    let self_starter = component(move |ctx, _props| {
        let (value, set_value) = ctx.use_state(0);
        ctx.use_effect(
            move || {
                set_value.set(7);
                None
            },
            Some(vec![]),
        );
        Element::text(value.to_string())
    });

    root.render(Element::from_component(&self_starter, Props::new()));
    runtime.flush().unwrap();

    assert_eq!(host.borrow().markup(container), "7");
}

// =============================================================================
// Context
// =============================================================================

#[test]
fn test_context_resolves_innermost_provider() {
    let (host, runtime, root, container) = setup();
    let theme: Context<&'static str> = Context::new("light");

    let reader = {
        let theme = theme.clone();
        component(move |ctx, _props| Element::text(ctx.use_context(&theme)))
    };

    root.render(Element::host(
        "div",
        Props::new(),
        vec![
            theme.provide(
                "dark",
                vec![
                    Element::from_component(&reader, Props::new()),
                    theme.provide("darker", vec![Element::from_component(&reader, Props::new())]),
                ],
            ),
            // Outside any provider: the channel default.
            Element::from_component(&reader, Props::new()),
        ],
    ));
    runtime.flush().unwrap();

    assert_eq!(host.borrow().markup(container), "<div>darkdarkerlight</div>");
}

// =============================================================================
// Refs
// =============================================================================

#[test]
fn test_node_ref_attaches_on_commit_and_detaches_on_removal() {
    let (host, runtime, root, container) = setup();
    let handle = create_node_ref();

    root.render(Element::host(
        "div",
        Props::new(),
        vec![Element::host("input", Props::new(), ()).with_ref(handle.clone())],
    ));
    runtime.flush().unwrap();

    let div = host.borrow().children(container)[0];
    let input = host.borrow().children(div)[0];
    assert_eq!(*handle.borrow(), Some(input));

    root.render(Element::host("div", Props::new(), ()));
    runtime.flush().unwrap();
    assert_eq!(*handle.borrow(), None);
}

// =============================================================================
// Fragments
// =============================================================================

#[test]
fn test_keyed_fragment_groups_host_nodes() {
    let (host, runtime, root, container) = setup();

    let pair = |a: &str, b: &str| {
        Element::fragment(vec![Element::text(a), Element::text(b)]).with_key("pair")
    };

    root.render(Element::host(
        "div",
        Props::new(),
        vec![pair("x", "y"), Element::host("span", Props::new(), "z")],
    ));
    runtime.flush().unwrap();
    assert_eq!(host.borrow().markup(container), "<div>xy<span>z</span></div>");
    host.borrow_mut().take_ops();

    // Shrinking the fragment deletes exactly the dropped node.
    root.render(Element::host(
        "div",
        Props::new(),
        vec![
            Element::fragment(vec![Element::text("x")]).with_key("pair"),
            Element::host("span", Props::new(), "z"),
        ],
    ));
    runtime.flush().unwrap();

    let ops = mutations(&host);
    assert_eq!(ops.len(), 1);
    assert!(matches!(ops[0], HostOp::Remove { .. }));
    assert_eq!(host.borrow().markup(container), "<div>x<span>z</span></div>");
}

// =============================================================================
// Priorities and interruption
// =============================================================================

#[test]
fn test_high_priority_update_discards_and_restarts_low_priority_pass() {
    let (host, runtime, root, container) = setup_with(YieldPolicy::UnitBudget(1));
    let counter = counter();

    root.render(Element::from_component(&counter.component, Props::new()));
    runtime.flush().unwrap();
    assert_eq!(host.borrow().markup(container), "0");
    let set = counter.setter.borrow().clone().unwrap();

    // A default-lane update starts rendering but yields after one unit.
    set.update(|n| n + 1);
    runtime.tick().unwrap();
    assert_eq!(host.borrow().markup(container), "0");

    // A user-blocking update supersedes the in-flight pass.
    runtime
        .run_with_priority(Priority::UserBlocking, || set.update(|n| n + 10))
        .unwrap();

    let mut committed = Vec::new();
    while runtime.has_pending_work() {
        runtime.tick().unwrap();
        let markup = host.borrow().markup(container);
        if committed.last() != Some(&markup) {
            committed.push(markup);
        }
    }

    // The high-priority result (skipping the older low-priority update)
    // commits first; the abandoned update still lands afterward, replayed
    // in arrival order: (0 + 1) + 10.
    assert!(
        committed.contains(&"10".to_string()),
        "high-priority commit missing: {committed:?}"
    );
    assert!(
        !committed.contains(&"1".to_string()),
        "low-priority pass must not commit first: {committed:?}"
    );
    assert_eq!(host.borrow().markup(container), "11");
}

#[test]
fn test_transition_defers_its_updates() {
    let (host, runtime, root, container) = setup();

    let handles: Rc<RefCell<Option<(TransitionStart, Dispatch<i32>)>>> =
        Rc::new(RefCell::new(None));
    let app = {
        let handles = handles.clone();
        component(move |ctx, _props| {
            let (pending, start) = ctx.use_transition();
            let (value, set_value) = ctx.use_state(0);
            *handles.borrow_mut() = Some((start, set_value));
            Element::text(format!("{pending}:{value}"))
        })
    };

    root.render(Element::from_component(&app, Props::new()));
    runtime.flush().unwrap();
    assert_eq!(host.borrow().markup(container), "false:0");

    let (start, set_value) = handles.borrow().clone().unwrap();
    start.start(|| set_value.set(42));

    let mut committed = Vec::new();
    while runtime.has_pending_work() {
        runtime.tick().unwrap();
        let markup = host.borrow().markup(container);
        if committed.last() != Some(&markup) {
            committed.push(markup);
        }
    }

    // The pending flag commits at ambient priority first; the deferred
    // value (and the flag reset) land in a later, lower-priority pass.
    assert!(
        committed.contains(&"true:0".to_string()),
        "pending flag should commit before the deferred value: {committed:?}"
    );
    assert_eq!(host.borrow().markup(container), "false:42");
}

// =============================================================================
// Failure containment
// =============================================================================

#[test]
fn test_hook_count_mismatch_abandons_the_pass() {
    let (host, runtime, root, container) = setup();

    let unstable = component(move |ctx, props| {
        let (value, _set) = ctx.use_state(1);
        if props.get("extra").is_some() {
            // A second hook that did not exist on the first render.
            let _ = ctx.use_state(2);
        }
        Element::text(value.to_string())
    });

    root.render(Element::from_component(&unstable, Props::new()));
    runtime.flush().unwrap();
    assert_eq!(host.borrow().markup(container), "1");
    host.borrow_mut().take_ops();

    // The offending render is discarded wholesale: no partial commit, and
    // the runtime keeps running.
    root.render(Element::from_component(
        &unstable,
        Props::new().set("extra", true),
    ));
    runtime.flush().unwrap();

    assert!(mutations(&host).is_empty());
    assert_eq!(host.borrow().markup(container), "1");
}

#[test]
fn test_component_panic_commits_nothing() {
    let (host, runtime, root, container) = setup();

    let fallible = component(move |_ctx, props| {
        if props.get("boom").is_some() {
            panic!("rendering exploded");
        }
        Element::text("ok")
    });

    root.render(Element::from_component(&fallible, Props::new()));
    runtime.flush().unwrap();
    assert_eq!(host.borrow().markup(container), "ok");
    host.borrow_mut().take_ops();

    root.render(Element::from_component(
        &fallible,
        Props::new().set("boom", true),
    ));
    runtime.flush().unwrap();

    assert!(mutations(&host).is_empty());
    assert_eq!(host.borrow().markup(container), "ok");
}
