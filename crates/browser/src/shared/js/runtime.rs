//! Page-side runtime installed once per document.
//!
//! It keeps an element registry keyed by integer handles, owns the hider
//! stylesheet and reports structural mutations through a CDP binding. Every
//! node it inserts carries `data-cmpilot` so its own changes are not reported.

/// Name of the `Runtime.addBinding` function the mutation observer calls.
pub const BINDING_NAME: &str = "__cmpilotMutations";

pub const HIDER_CLASS: &str = "cmpilot-hidden";

pub const INSTALL: &str = r#"
(binding, hiderClass) => {
    if (window.__cmpilot) return true;

    const OWN = 'data-cmpilot';
    const byId = new Map();
    const ids = new WeakMap();
    // Handles from a previous document never resolve in this one.
    let nextId = Math.floor(Math.random() * 1e6) * 1e6 + 1;

    const handle = (el) => {
        let id = ids.get(el);
        if (id === undefined) {
            id = nextId++;
            ids.set(el, id);
            byId.set(id, el);
        }
        return id;
    };

    const element = (id) => {
        const el = byId.get(id);
        if (!el || !el.isConnected) {
            byId.delete(id);
            throw new Error('cmpilot:stale:' + id);
        }
        return el;
    };

    const own = (node) => {
        const el = node.nodeType === 1 ? node : node.parentElement;
        return !!el && !!el.closest('[' + OWN + ']');
    };

    const ensureHider = () => {
        if (document.querySelector('style[' + OWN + '="hider"]')) return;
        const style = document.createElement('style');
        style.setAttribute(OWN, 'hider');
        style.textContent = '.' + hiderClass +
            ' { opacity: 0 !important; z-index: -1 !important; pointer-events: none !important; }';
        (document.head || document.documentElement).appendChild(style);
    };

    const observer = new MutationObserver((records) => {
        const foreign = records.filter((r) =>
            !own(r.target) && ![...r.addedNodes, ...r.removedNodes].every(own));
        if (foreign.length > 0 && typeof window[binding] === 'function') {
            window[binding](String(foreign.length));
        }
    });
    observer.observe(document, { childList: true, subtree: true });

    window.__cmpilot = { OWN, handle, element, ensureHider };
    return true;
}
"#;

pub const CLOSE_WINDOW: &str = r#"
() => { window.close(); return true; }
"#;
