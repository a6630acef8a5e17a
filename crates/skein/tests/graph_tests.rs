//! End-to-end tests for graph construction, compilation and execution.

use std::collections::HashMap;

use skein::prelude::*;
use skein::{Error, OpKind};

fn bind(pairs: &[(&str, Tensor)]) -> HashMap<String, Tensor> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

#[test]
fn test_add_and_rebind() {
    let g = Graph::new();
    let a = g.placeholder("a");
    let b = g.placeholder("b");
    let f = g.compile(&[&a + &b]).unwrap();

    let out = f
        .call(&bind(&[("a", Tensor::scalar(1.0)), ("b", Tensor::scalar(2.0))]))
        .unwrap();
    assert_eq!(out[0].item().unwrap(), 3.0);

    // Same function, fresh bindings; no state leaks between calls.
    let out = f
        .call(&bind(&[("a", Tensor::scalar(5.0)), ("b", Tensor::scalar(4.0))]))
        .unwrap();
    assert_eq!(out[0].item().unwrap(), 9.0);

    // Identical bindings are idempotent.
    let again = f
        .call(&bind(&[("a", Tensor::scalar(5.0)), ("b", Tensor::scalar(4.0))]))
        .unwrap();
    assert_eq!(again[0].item().unwrap(), 9.0);
}

#[test]
fn test_product_gradients() {
    // loss = x*y*z, so dloss/dx = y*z and so on.
    let g = Graph::new();
    let x = g.placeholder("x");
    let y = g.placeholder("y");
    let z = g.placeholder("z");
    let loss = ((&x * &y) * &z).sum();
    let gx = g.grad(&loss, &x);
    let gy = g.grad(&loss, &y);
    let gz = g.grad(&loss, &z);

    let f = g.compile(&[gx, gy, gz]).unwrap();
    let out = f
        .call(&bind(&[
            ("x", Tensor::scalar(1.0)),
            ("y", Tensor::scalar(3.0)),
            ("z", Tensor::scalar(4.0)),
        ]))
        .unwrap();
    assert_eq!(out[0].item().unwrap(), 12.0);
    assert_eq!(out[1].item().unwrap(), 4.0);
    assert_eq!(out[2].item().unwrap(), 3.0);
}

#[test]
fn test_value_and_gradients_together() {
    let g = Graph::new();
    let a = g.placeholder("a");
    let b = g.placeholder("b");
    let c = &a * &b;
    let da = g.grad(&c, &a);
    let db = g.grad(&c, &b);
    let f = g.compile(&[c, da, db]).unwrap();
    let out = f
        .call(&bind(&[("a", Tensor::scalar(3.0)), ("b", Tensor::scalar(4.0))]))
        .unwrap();
    assert_eq!(out[0].item().unwrap(), 12.0);
    assert_eq!(out[1].item().unwrap(), 4.0);
    assert_eq!(out[2].item().unwrap(), 3.0);
}

#[test]
fn test_graph_queries() {
    let g = Graph::new();
    let x = g.placeholder("x");
    let w = g.parameter(Tensor::scalar(1.0), Some("w"));
    let b = g.parameter(Tensor::scalar(0.0), Some("b"));
    let y = (&x * &w) + &b;
    let outs = [y];

    let params = g.trainable_params(&outs).unwrap();
    assert_eq!(params.len(), 2);
    assert!(params.contains(&w));
    assert!(params.contains(&b));

    // Renamed nodes display as name{auto} in diagnostics.
    let names = g.reachable_oprs(&outs).unwrap();
    assert!(names.iter().any(|n| n.starts_with("w{parameter_")));

    let found = g.find_opr(&outs, "w").unwrap().unwrap();
    assert_eq!(found, w);
    assert!(g.find_opr(&outs, "nothing-here").unwrap().is_none());
}

#[test]
fn test_update_mutates_parameter() {
    let g = Graph::new();
    let p = g.parameter(Tensor::scalar(10.0), Some("p"));
    let stepped = g.update(&p, &p - 1.0).unwrap();
    let f = g.compile(&[stepped]).unwrap();

    let out = f.call(&HashMap::new()).unwrap();
    assert_eq!(out[0].item().unwrap(), 9.0);
    assert_eq!(g.param_value(&p).unwrap().item().unwrap(), 9.0);

    let out = f.call(&HashMap::new()).unwrap();
    assert_eq!(out[0].item().unwrap(), 8.0);
    assert_eq!(g.param_value(&p).unwrap().item().unwrap(), 8.0);
}

#[test]
fn test_push_opr_checks_arity() {
    let g = Graph::new();
    let x = g.placeholder("x");
    match g.push_opr(OpKind::Neg, &[x.clone(), x.clone()], None) {
        Err(Error::ArityViolation {
            expected: 1, got: 2, ..
        }) => {}
        other => panic!("expected arity violation, got {:?}", other.map(|_| ())),
    }
    assert!(g.push_opr(OpKind::Neg, &[x], None).is_ok());
}

#[test]
fn test_update_requires_parameter() {
    let g = Graph::new();
    let x = g.immutable(Tensor::scalar(1.0));
    assert!(g.update(&x, 2.0).is_err());
}

#[test]
fn test_functions_share_parameter_state() {
    let g = Graph::new();
    let w = g.parameter(Tensor::scalar(3.0), Some("w"));
    let doubled = &w * 2.0;
    let reader = g.compile(&[doubled]).unwrap();
    let writer = g.compile(&[g.update(&w, &w + 1.0).unwrap()]).unwrap();

    assert_eq!(reader.call(&HashMap::new()).unwrap()[0].item().unwrap(), 6.0);
    writer.call(&HashMap::new()).unwrap();
    assert_eq!(reader.call(&HashMap::new()).unwrap()[0].item().unwrap(), 8.0);
}

#[test]
fn test_unbound_placeholder() {
    let g = Graph::new();
    let a = g.placeholder("a");
    let f = g.compile(&[a.sum()]).unwrap();
    match f.call(&HashMap::new()) {
        Err(Error::UnboundInput { name }) => assert_eq!(name, "a"),
        other => panic!("expected unbound input error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_matmul_mismatch_surfaces_at_call() {
    let g = Graph::new();
    let a = g.placeholder("a");
    let b = g.placeholder("b");
    let f = g.compile(&[g.matmul(&a, &b)]).unwrap();
    let res = f.call(&bind(&[
        ("a", Tensor::zeros((2, 3))),
        ("b", Tensor::zeros((4, 5))),
    ]));
    match res {
        Err(Error::MatmulShapeMismatch { k1: 3, k2: 4, .. }) => {}
        other => panic!("expected matmul mismatch, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_nested_gradient_rejected() {
    let g = Graph::new();
    let x = g.placeholder("x");
    let loss = x.pow(2.0).sum();
    let gx = g.grad(&loss, &x);
    let ggx = g.grad(&gx.sum(), &x);
    match g.compile(&[ggx]) {
        Err(Error::UnsupportedGraph(_)) => {}
        other => panic!("expected unsupported graph, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_gradient_of_unrelated_value_rejected() {
    let g = Graph::new();
    let x = g.placeholder("x");
    let w = g.parameter(Tensor::scalar(1.0), Some("w"));
    let loss = x.sum();
    let gw = g.grad(&loss, &w);
    match g.compile(&[gw]) {
        Err(Error::UnsupportedGraph(_)) => {}
        other => panic!("expected unsupported graph, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_non_scalar_loss_rejected_at_call() {
    let g = Graph::new();
    let x = g.placeholder("x");
    let gx = g.grad(&x, &x);
    let f = g.compile(&[gx]).unwrap();
    match f.call(&bind(&[("x", Tensor::zeros(3))])) {
        Err(Error::NotAScalar { .. }) => {}
        other => panic!("expected non-scalar loss error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_broadcast_gradient_folds_back() {
    // loss = sum(v + s) with v: [5], s: [1]. The gradient toward s must
    // collapse back to its shape by summing the synthesized axis.
    let g = Graph::new();
    let v = g.placeholder("v");
    let s = g.placeholder("s");
    let loss = (&v + &s).sum();
    let gv = g.grad(&loss, &v);
    let gs = g.grad(&loss, &s);
    let f = g.compile(&[gv, gs]).unwrap();

    let out = f
        .call(&bind(&[
            ("v", Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0, 5.0], 5).unwrap()),
            ("s", Tensor::scalar(0.5)),
        ]))
        .unwrap();
    assert_eq!(out[0].to_vec(), vec![1.0; 5]);
    assert_eq!(out[1].dims(), &[1]);
    assert_eq!(out[1].item().unwrap(), 5.0);
}

#[test]
fn test_incompatible_broadcast_fails() {
    let g = Graph::new();
    let a = g.placeholder("a");
    let b = g.placeholder("b");
    let f = g.compile(&[&a + &b]).unwrap();
    let res = f.call(&bind(&[
        ("a", Tensor::zeros(6)),
        ("b", Tensor::zeros((2, 3))),
    ]));
    match res {
        Err(Error::BroadcastMismatch { .. }) => {}
        other => panic!("expected broadcast mismatch, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_independent_losses_do_not_contaminate() {
    // Two losses over the same input: each backward pass starts from
    // cleared gradients, so the extracted values stay independent.
    let g = Graph::new();
    let x = g.placeholder("x");
    let l1 = x.pow(2.0).sum();
    let l2 = (&x * 3.0).sum();
    let g1 = g.grad(&l1, &x);
    let g2 = g.grad(&l2, &x);
    let f = g.compile(&[g1, g2]).unwrap();

    let out = f
        .call(&bind(&[(
            "x",
            Tensor::from_vec(vec![1.0, 2.0, 4.0], 3).unwrap(),
        )]))
        .unwrap();
    assert_eq!(out[0].to_vec(), vec![2.0, 4.0, 8.0]);
    assert_eq!(out[1].to_vec(), vec![3.0, 3.0, 3.0]);
}

#[test]
fn test_selective_backward_skips_unrequested_paths() {
    // Gradient only w.r.t. y: the x path carries no gradient state, and
    // the result is exactly dloss/dy.
    let g = Graph::new();
    let x = g.placeholder("x");
    let y = g.placeholder("y");
    let loss = ((&x * &x) + (&y * &y)).sum();
    let gy = g.grad(&loss, &y);
    let f = g.compile(&[gy]).unwrap();
    let out = f
        .call(&bind(&[
            ("x", Tensor::scalar(7.0)),
            ("y", Tensor::scalar(3.0)),
        ]))
        .unwrap();
    assert_eq!(out[0].item().unwrap(), 6.0);
}

#[test]
fn test_comparisons_produce_masks() {
    let g = Graph::new();
    let x = g.placeholder("x");
    let f = g
        .compile(&[x.ge(2.0), x.gt(2.0), x.eq_elem(2.0)])
        .unwrap();
    let out = f
        .call(&bind(&[(
            "x",
            Tensor::from_vec(vec![1.0, 2.0, 3.0], 3).unwrap(),
        )]))
        .unwrap();
    assert_eq!(out[0].to_vec(), vec![0.0, 1.0, 1.0]);
    assert_eq!(out[1].to_vec(), vec![0.0, 0.0, 1.0]);
    assert_eq!(out[2].to_vec(), vec![0.0, 1.0, 0.0]);
}

#[test]
fn test_shape_introspection() {
    let g = Graph::new();
    let x = g.placeholder("x");
    let f = g.compile(&[x.shape_of(), x.shape_index(1)]).unwrap();
    let out = f.call(&bind(&[("x", Tensor::zeros((2, 5)))])).unwrap();
    assert_eq!(out[0].to_vec(), vec![2.0, 5.0]);
    assert_eq!(out[1].item().unwrap(), 5.0);
}

#[test]
fn test_gradient_usable_downstream() {
    // A gradient is an ordinary value: arithmetic on it runs after the
    // backward pass that fills it in.
    let g = Graph::new();
    let x = g.placeholder("x");
    let loss = x.pow(2.0).sum();
    let gx = g.grad(&loss, &x);
    let half_step = &x - (&gx * 0.5);
    let f = g.compile(&[half_step]).unwrap();
    let out = f.call(&bind(&[("x", Tensor::scalar(4.0))])).unwrap();
    // x - 0.5 * 2x = 0
    assert_eq!(out[0].item().unwrap(), 0.0);
}

#[test]
fn test_hinge_classifier_trains_by_graph_updates() {
    // A linear classifier trained entirely inside the graph: hinge loss,
    // gradient extraction, and in-graph SGD updates, with a separately
    // compiled prediction function sharing the same weights.
    let g = Graph::new();
    let xs = g.placeholder("xs");
    let ys = g.placeholder("ys");
    let w = g.parameter(Tensor::zeros((2, 1)), Some("w"));
    let b = g.parameter(Tensor::zeros(1), Some("b"));

    let margin = &ys * (g.matmul(&xs, &w) + &b);
    let loss = g.max(0.0, 1.0 - margin).sum();
    let gw = g.grad(&loss, &w);
    let gb = g.grad(&loss, &b);
    let lr = 0.05;
    let step_w = g.update(&w, &w - (&gw * lr)).unwrap();
    let step_b = g.update(&b, &b - (&gb * lr)).unwrap();
    let train = g.compile(&[loss, step_w, step_b]).unwrap();

    let predict = g.compile(&[g.matmul(&xs, &w) + &b]).unwrap();

    let data = Tensor::from_vec(
        vec![2.0, 2.0, 3.0, 1.0, -2.0, -1.0, -1.0, -3.0],
        (4, 2),
    )
    .unwrap();
    let labels = Tensor::from_vec(vec![1.0, 1.0, -1.0, -1.0], (4, 1)).unwrap();

    let mut last_loss = f64::INFINITY;
    for _ in 0..200 {
        let out = train
            .call(&bind(&[("xs", data.clone()), ("ys", labels.clone())]))
            .unwrap();
        last_loss = out[0].item().unwrap();
    }
    assert!(last_loss < 0.5, "hinge loss did not come down: {last_loss}");

    let scores = predict
        .call(&bind(&[("xs", data.clone()), ("ys", labels.clone())]))
        .unwrap();
    for (score, label) in scores[0].to_vec().iter().zip(labels.to_vec()) {
        assert!(
            score * label > 0.0,
            "misclassified: score {score}, label {label}"
        );
    }
}
